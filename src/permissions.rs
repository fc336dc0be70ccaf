//! Screen-capture capability gate.
//!
//! Queries the platform capture permission. The answer is advisory only:
//! the scheduler logs it and attempts capture regardless, since the capture
//! call itself may raise the system permission prompt.

use crate::types::PermissionState;

/// Check the platform screen-capture permission.
///
/// No side effects beyond the status read.
pub fn check() -> PermissionState {
    #[cfg(target_os = "macos")]
    {
        extern "C" {
            fn CGPreflightScreenCaptureAccess() -> bool;
        }

        if unsafe { CGPreflightScreenCaptureAccess() } {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        // No distinguishable screen-capture permission on this platform;
        // treated as granted for scheduling purposes.
        PermissionState::NotApplicable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_returns_a_state() {
        let state = check();
        #[cfg(not(target_os = "macos"))]
        assert_eq!(state, PermissionState::NotApplicable);
        #[cfg(target_os = "macos")]
        assert!(matches!(
            state,
            PermissionState::Granted | PermissionState::Denied
        ));
    }
}
