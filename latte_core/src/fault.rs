//! Maps `Box<dyn Error>` from the device trait boundaries to typed
//! `MachineError`.
//!
//! The traits in `latte_traits` use `Box<dyn Error + Send + Sync>` for
//! maximum flexibility; this module converts those to our typed error
//! enum, with an optional feature-gated path for `latte_link::LinkError`
//! downcasting.

use crate::error::MachineError;

/// Map a trait-boundary error to a typed `MachineError`.
///
/// Attempts to downcast the known link error type first, then falls back
/// to string-based heuristics.
pub fn map_link_error(e: &(dyn std::error::Error + 'static)) -> MachineError {
    #[cfg(feature = "link-errors")]
    {
        if let Some(le) = e.downcast_ref::<latte_link::LinkError>() {
            return match le {
                latte_link::LinkError::DeviceFault { id, status } => MachineError::DeviceFault {
                    id: *id,
                    status: *status,
                },
                other => MachineError::Link(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("status") {
        // Device fault surfaced through a non-link error type.
        MachineError::DeviceFault { id: 0, status: 0xff }
    } else {
        MachineError::Link(s)
    }
}

/// True for failures the run loop should log and ride out until the next
/// cycle (a device refusing one command is not a dead link).
pub fn is_device_fault(err: &eyre::Report) -> bool {
    matches!(
        err.downcast_ref::<MachineError>(),
        Some(MachineError::DeviceFault { .. })
    )
}

#[cfg(all(test, feature = "link-errors"))]
mod tests {
    use super::*;

    #[test]
    fn downcasts_device_fault() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(latte_link::LinkError::DeviceFault { id: 4, status: 2 });
        match map_link_error(&*boxed) {
            MachineError::DeviceFault { id, status } => {
                assert_eq!((id, status), (4, 2));
            }
            other => panic!("expected DeviceFault, got {other:?}"),
        }
    }

    #[test]
    fn timeout_maps_to_link_error() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(latte_link::LinkError::Timeout);
        assert!(matches!(map_link_error(&*boxed), MachineError::Link(_)));
    }

    #[test]
    fn classifies_transients() {
        let fault = eyre::Report::new(MachineError::DeviceFault { id: 2, status: 1 });
        assert!(is_device_fault(&fault));
        let hard = eyre::Report::new(MachineError::Link("timeout".into()));
        assert!(!is_device_fault(&hard));
    }
}
