//! Completion polling of the u02 command field.

use crate::config::dwell;
use crate::error::{AxiomError, Result};
use crate::protocol::constants::SYSMGR_IDLE;

/// Poll `read_status` until the device reports idle.
///
/// `in_progress` is the value the field holds while the device is still
/// working; zero means done and anything else is a failure code. Returns
/// the number of polls that saw the operation still in progress.
pub fn wait_for_completion<F>(
    usage: u8,
    in_progress: u16,
    retries: u32,
    interval_ms: u64,
    mut read_status: F,
) -> Result<u32>
where
    F: FnMut() -> Result<u16>,
{
    let mut last_status = in_progress;
    for attempt in 0..retries {
        let status = read_status()?;
        if status == SYSMGR_IDLE {
            return Ok(attempt);
        }
        if status != in_progress {
            return Err(AxiomError::CommandFailed {
                usage,
                code: status,
            });
        }
        last_status = status;
        dwell(interval_ms);
    }
    Err(AxiomError::WriteTimeout {
        usage,
        retries,
        last_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(statuses: &[u16]) -> impl FnMut() -> Result<u16> + '_ {
        let mut iter = statuses.iter();
        move || Ok(*iter.next().unwrap_or(&0x7FFF))
    }

    #[test]
    fn test_success_after_two_retries() {
        let retries = wait_for_completion(0x07, 0x7FFF, 1000, 0, scripted(&[0x7FFF, 0x7FFF, 0])).unwrap();
        assert_eq!(retries, 2);
    }

    #[test]
    fn test_immediate_success() {
        assert_eq!(wait_for_completion(0x07, 0x7FFF, 1000, 0, scripted(&[0])).unwrap(), 0);
    }

    #[test]
    fn test_failure_code_surfaces() {
        let err = wait_for_completion(0x07, 0x7FFF, 1000, 0, scripted(&[0x7FFF, 0x0042])).unwrap_err();
        assert!(matches!(
            err,
            AxiomError::CommandFailed {
                usage: 0x07,
                code: 0x0042
            }
        ));
    }

    #[test]
    fn test_timeout_reports_last_status() {
        let mut polls = 0;
        let err = wait_for_completion(0x02, 0x0009, 4, 0, || {
            polls += 1;
            Ok(0x0009)
        })
        .unwrap_err();
        assert_eq!(polls, 4);
        assert!(matches!(
            err,
            AxiomError::WriteTimeout {
                usage: 0x02,
                retries: 4,
                last_status: 0x0009
            }
        ));
    }
}
