//! The fixed command/response pairs the Agent Health Prober smoke-tests
//! against (spec.md §6, mirrored in `dr-syncer-controller::agent`). Kept as
//! a pure lookup so the exec handler in `server.rs` has nothing to get wrong.

pub const SMOKE_TEST_COMMAND: &str = "echo dr-syncer-ssh-test";
pub const SMOKE_TEST_RESPONSE: &str = "dr-syncer-ssh-test\n";

pub const PROXY_TEST_COMMAND: &str = "ssh-command-handler.sh test-connection";
pub const PROXY_TEST_RESPONSE: &str = "SSH proxy connection successful\n";

/// Maps an exec'd command line to its canned response, or `None` for
/// anything outside the two smoke-test commands this agent understands.
pub fn respond_to(command: &str) -> Option<&'static str> {
    match command.trim() {
        SMOKE_TEST_COMMAND => Some(SMOKE_TEST_RESPONSE),
        PROXY_TEST_COMMAND => Some(PROXY_TEST_RESPONSE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_test_command_is_recognized() {
        assert_eq!(respond_to(SMOKE_TEST_COMMAND), Some(SMOKE_TEST_RESPONSE));
    }

    #[test]
    fn proxy_test_command_is_recognized() {
        assert_eq!(respond_to(PROXY_TEST_COMMAND), Some(PROXY_TEST_RESPONSE));
    }

    #[test]
    fn surrounding_whitespace_is_tolerated() {
        assert_eq!(respond_to("  echo dr-syncer-ssh-test  "), Some(SMOKE_TEST_RESPONSE));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(respond_to("rm -rf /"), None);
    }
}
