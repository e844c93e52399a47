use super::config;
#[cfg(unix)]
use nix::libc;
use tracing::{debug, error};

#[cfg(unix)]
const RT_POLICY: i32 = libc::SCHED_FIFO;
pub const RT_PRIORITY_IO: i32 = 18;
pub const RT_PRIORITY_WATCHDOG: i32 = 14;
pub const RT_PRIORITY_EVENTS: i32 = 12;

/// Names the calling thread, raises it to realtime priority and lets it run on
/// every CPU. Failures are logged; the thread keeps running at normal priority.
pub fn promote_current_thread(name: &str, priority: i32, realtime: bool) {
    if let Err(e) = set_full_affinity() {
        debug!("{} affinity not changed: {}", name, e);
    }
    if !realtime || config::env_flag(config::NO_REALTIME_ENV) {
        return;
    }
    if let Err(e) = configure_rt_thread(name, priority) {
        error!("{} realtime priority not enabled: {}", name, e);
    }
}

fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    #[cfg(unix)]
    {
        let thread = unsafe { libc::pthread_self() };
        #[cfg(target_os = "linux")]
        {
            let short: String = name.chars().take(15).collect();
            let c_name = std::ffi::CString::new(short).map_err(|e| e.to_string())?;
            unsafe {
                let _ = libc::pthread_setname_np(thread, c_name.as_ptr());
            }
        }

        let param = unsafe {
            let mut p = std::mem::zeroed::<libc::sched_param>();
            p.sched_priority = priority;
            p
        };
        let rc = unsafe { libc::pthread_setschedparam(thread, RT_POLICY, &param) };
        if rc != 0 {
            return Err(format!(
                "pthread_setschedparam({}, prio {}) failed with errno {}",
                name, priority, rc
            ));
        }

        let mut actual_policy = 0_i32;
        let mut actual_param = unsafe { std::mem::zeroed::<libc::sched_param>() };
        let rc =
            unsafe { libc::pthread_getschedparam(thread, &mut actual_policy, &mut actual_param) };
        if rc != 0 {
            return Err(format!(
                "pthread_getschedparam({}) failed with errno {}",
                name, rc
            ));
        }
        if actual_policy != RT_POLICY || actual_param.sched_priority != priority {
            return Err(format!(
                "realtime verification failed for {}: policy {}, prio {}",
                name, actual_policy, actual_param.sched_priority
            ));
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = name;
        let _ = priority;
        Err("Realtime thread priority is not supported on this platform".to_string())
    }
}

fn set_full_affinity() -> Result<(), String> {
    #[cfg(target_os = "linux")]
    {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut set = CpuSet::new();
        for cpu in 0..num_cpus::get().min(CpuSet::count()) {
            set.set(cpu).map_err(|e| e.to_string())?;
        }
        sched_setaffinity(Pid::from_raw(0), &set).map_err(|e| e.to_string())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Ok(())
    }
}
