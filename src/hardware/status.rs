//! Status-code checking for the vendor C interfaces.
//!
//! Both SDKs report every call through an integer status where zero means success.
//! Anything else becomes a [`DaqError::HardwareProtocol`] carrying the code and the
//! vendor's own description of it.

use crate::error::{AppResult, DaqError, Subsystem};

/// Status code both SDKs use for success.
pub const STATUS_OK: i64 = 0;

/// Translate `code` into a result, looking up the diagnostic text only on failure.
pub fn check<F>(subsystem: Subsystem, code: i64, describe: F) -> AppResult<()>
where
    F: FnOnce(i64) -> String,
{
    if code == STATUS_OK {
        return Ok(());
    }
    let message = describe(code);
    tracing::error!(%subsystem, code, %message, "Subsystem call failed");
    Err(DaqError::HardwareProtocol {
        subsystem,
        code,
        message,
    })
}

/// Like [`check`], but reports the failure as a rejected setup parameter.
pub fn check_config<F>(subsystem: Subsystem, code: i64, what: &str, describe: F) -> AppResult<()>
where
    F: FnOnce(i64) -> String,
{
    check(subsystem, code, describe).map_err(|err| match err {
        DaqError::HardwareProtocol { code, message, .. } => {
            DaqError::HardwareConfig(format!("{what} rejected ({code}): {message}"))
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_success_and_skips_lookup() {
        let result = check(Subsystem::Actuator, 0, |_| unreachable!("no lookup on success"));
        assert!(result.is_ok());
    }

    #[test]
    fn nonzero_is_protocol_error_with_text() {
        let err = check(Subsystem::Sampler, -200284, |code| format!("lookup {code}"))
            .unwrap_err();
        match err {
            DaqError::HardwareProtocol {
                subsystem,
                code,
                message,
            } => {
                assert_eq!(subsystem, Subsystem::Sampler);
                assert_eq!(code, -200284);
                assert_eq!(message, "lookup -200284");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn config_check_maps_to_config_error() {
        let err = check_config(Subsystem::Actuator, 7, "closed-loop speed", |_| {
            "out of range".into()
        })
        .unwrap_err();
        assert!(matches!(err, DaqError::HardwareConfig(ref m) if m.contains("closed-loop speed")));
    }
}
