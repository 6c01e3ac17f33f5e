use dns_lookup::lookup_host;
use std::net::IpAddr;

use crate::cli::TargetSpec;
use crate::icmp::Family;
use crate::target::{Target, TargetSet};

/// Resolves `host` to every address of an enabled family.
pub async fn resolve_host(host: &str, use_ipv4: bool, use_ipv6: bool) -> anyhow::Result<Vec<IpAddr>> {
    let enabled = |addr: &IpAddr| match Family::of(addr) {
        Family::V4 => use_ipv4,
        Family::V6 => use_ipv6,
    };

    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        if !enabled(&ip) {
            return Err(anyhow::anyhow!("{} provided but {} is disabled", ip, Family::of(&ip)));
        }
        return Ok(vec![ip]);
    }

    let addresses = tokio::task::spawn_blocking({
        let host = host.to_string();
        move || lookup_host(&host)
    })
    .await??;

    let mut filtered: Vec<IpAddr> = addresses.into_iter().filter(enabled).collect();
    filtered.dedup();

    if filtered.is_empty() {
        return Err(anyhow::anyhow!("No usable addresses found for hostname: {}", host));
    }
    Ok(filtered)
}

/// Builds the target snapshot. Hosts that fail to resolve are skipped with
/// an error log.
pub async fn resolve_targets(specs: &[TargetSpec], use_ipv4: bool, use_ipv6: bool) -> TargetSet {
    let mut targets = Vec::new();
    for spec in specs {
        match resolve_host(&spec.host, use_ipv4, use_ipv6).await {
            Ok(addrs) => {
                for addr in addrs {
                    log::debug!("Adding target {} ({}) with tags {:?}", spec.host, addr, spec.tags);
                    targets.push(Target::new(spec.host.clone(), addr, spec.tags.clone()));
                }
            }
            Err(e) => log::error!("Unable to resolve target '{}': {}", spec.host, e),
        }
    }
    TargetSet::new(targets)
}
