//! Host-local process liveness probe for stale-lock classification.

/// Whether the process that owns a lock row is still running.
///
/// Liveness is only knowable for processes on this host. For rows declaring a
/// foreign hostname the policy is trust-the-TTL: report alive and let
/// `expires_at` decide.
pub(crate) fn process_is_alive(pid: i64, declared_hostname: &str) -> bool {
    if declared_hostname != local_hostname() {
        return true;
    }
    pid_is_running(pid)
}

pub(crate) fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(unix)]
fn pid_is_running(pid: i64) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) probes existence without signalling. EPERM still means the
    // process exists.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_is_running(_pid: i64) -> bool {
    // No portable probe here; rely on TTL expiry.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_is_alive() {
        let pid = i64::from(std::process::id());
        assert!(process_is_alive(pid, &local_hostname()));
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_pid_is_dead() {
        // Beyond any realistic pid_max.
        assert!(!process_is_alive(0x3fff_fff0, &local_hostname()));
    }

    #[test]
    fn foreign_host_rows_are_trusted_until_ttl() {
        assert!(process_is_alive(1, "some-other-host.invalid"));
    }
}
