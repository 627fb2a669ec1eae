// Adapted from libfranka-rs, Copyright (c) 2021 Marco Boneberger,
// licensed under the EUPL-1.2-or-later.

use crate::exception::{ServoException, ServoResult};
use std::path::Path;

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Sets the current thread to the highest possible scheduler priority.
///
/// # Errors
/// * RealTimeException if realtime priority cannot be set for the current thread.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///marco            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> ServoResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to get maximum possible thread priority".to_string(),
            });
        }
        let thread_param = libc::sched_param {
            // https://rt.wiki.kernel.org/index.php/HOWTO:_Build_an_RT-application recommends
            // staying one step below the maximum priority
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to set realtime scheduling".to_string(),
            });
        }
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(ServoException::RealTimeException {
                message: "servo: unable to lock memory".to_string(),
            });
        }
    }
    Ok(())
}
