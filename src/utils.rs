use std::process;
use std::time::Duration;

use crate::icmp::{Family, check_raw_socket_privileges};

/// Echo identifier for this process: the low 16 bits of its pid.
pub fn process_identifier() -> u16 {
    (process::id() & 0xffff) as u16
}

/// Detailed privilege check for raw-socket mode
pub fn check_privileges_detailed(families: &[Family]) -> anyhow::Result<()> {
    let missing: Vec<String> = families
        .iter()
        .filter(|family| !check_raw_socket_privileges(**family))
        .map(|family| family.to_string())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "privileged mode requested but raw {} sockets cannot be created.\n\
        Run as root, grant CAP_NET_RAW to the binary, or drop --privileged to use\n\
        unprivileged ping sockets.",
        missing.join("/")
    ))
}

/// Print error message and exit with error code
pub fn exit_with_error(message: &str, code: i32) -> ! {
    eprintln!("echomon: {}", message);
    process::exit(code);
}

/// Validate engine parameters
pub fn validate_engine_params(period: Duration, timeout: Duration, queue: usize) -> anyhow::Result<()> {
    if period.is_zero() {
        return Err(anyhow::anyhow!("period must be greater than 0"));
    }

    if timeout.is_zero() {
        return Err(anyhow::anyhow!("timeout must be greater than 0"));
    }

    if queue == 0 {
        return Err(anyhow::anyhow!("report queue capacity must be greater than 0"));
    }

    if timeout < period {
        log::warn!(
            "timeout ({:?}) is shorter than the send period ({:?}); probes may be swept before a reply can arrive",
            timeout,
            period
        );
    }

    Ok(())
}

/// Duration as fractional milliseconds
pub fn milliseconds(d: Duration) -> f64 {
    d.as_millis() as f64 + f64::from(d.subsec_nanos() % 1_000_000) / 1_000_000.0
}

/// Format time duration for display
pub fn format_time(ms: f64) -> String {
    if ms < 1.0 {
        "<1ms".to_string()
    } else {
        format!("{:.0}ms", ms)
    }
}

/// Resolves once Ctrl+C is received.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_identifier_is_stable() {
        assert_eq!(process_identifier(), process_identifier());
        assert_eq!(u32::from(process_identifier()), process::id() & 0xffff);
    }

    #[test]
    fn test_parameter_validation() {
        let second = Duration::from_secs(1);
        assert!(validate_engine_params(second, second * 10, 1024).is_ok());
        assert!(validate_engine_params(Duration::ZERO, second, 1024).is_err());
        assert!(validate_engine_params(second, Duration::ZERO, 1024).is_err());
        assert!(validate_engine_params(second, second, 0).is_err());
    }

    #[test]
    fn test_milliseconds() {
        assert_eq!(milliseconds(Duration::from_millis(20)), 20.0);
        assert_eq!(milliseconds(Duration::from_micros(20_500)), 20.5);
        assert_eq!(milliseconds(Duration::from_secs(2)), 2000.0);
    }

    #[test]
    fn test_time_formatting() {
        assert_eq!(format_time(0.5), "<1ms");
        assert_eq!(format_time(1.0), "1ms");
        assert_eq!(format_time(15.7), "16ms");
        assert_eq!(format_time(100.0), "100ms");
    }
}
