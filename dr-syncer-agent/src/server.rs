//! SSH command server (spec.md §6): authenticates with the single public key
//! the Key Authority wrote for this node and answers exactly the two
//! smoke-test commands the Agent Health Prober issues (`command.rs`);
//! anything else is rejected with a non-zero exit status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::keys::PublicKey;
use russh::server::{Auth, Config, Handler, Msg, Server as RusshServer, Session};
use russh::{Channel, ChannelId, CryptoVec};

use crate::command::respond_to;

#[derive(Clone)]
pub struct AgentServer {
    authorized_key: PublicKey,
}

impl AgentServer {
    pub fn new(authorized_key: PublicKey) -> Self {
        Self { authorized_key }
    }

    pub async fn run(mut self, host_key: russh::keys::PrivateKey, port: u16) -> anyhow::Result<()> {
        let config = Arc::new(Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_secs(1),
            ..Default::default()
        });
        let addr = format!("0.0.0.0:{port}");
        russh::server::Server::run_on_address(&mut self, config, addr).await?;
        Ok(())
    }
}

impl RusshServer for AgentServer {
    type Handler = Self;

    fn new_client(&mut self, _addr: Option<std::net::SocketAddr>) -> Self {
        self.clone()
    }
}

#[async_trait]
impl Handler for AgentServer {
    type Error = anyhow::Error;

    async fn auth_publickey(&mut self, _user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        if key.key_data() == self.authorized_key.key_data() {
            Ok(Auth::Accept)
        } else {
            Ok(Auth::reject())
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data);
        tracing::info!(%command, "exec request");
        match respond_to(&command) {
            Some(response) => {
                session.data(channel, CryptoVec::from(response.as_bytes().to_vec()))?;
                session.exit_status_request(channel, 0)?;
            }
            None => {
                session.exit_status_request(channel, 1)?;
            }
        }
        session.close(channel)?;
        Ok(())
    }
}
