use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::IpAddr;
use std::time::Duration;

use crate::icmp::Family;

/// A configured host and the tags attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub tags: Vec<String>,
}

impl std::str::FromStr for TargetSpec {
    type Err = String;

    /// `HOST` or `HOST#TAG,TAG...`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, tags) = match s.split_once('#') {
            Some((host, tags)) => (host, tags),
            None => (s, ""),
        };
        let host = host.trim();
        if host.is_empty() {
            return Err(format!("empty host in target '{}'", s));
        }
        let tags = tags
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        Ok(Self {
            host: host.to_string(),
            tags,
        })
    }
}

/// Engine settings, read once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub targets: Vec<TargetSpec>,
    pub period: Duration,
    pub timeout: Duration,
    pub privileged: bool,
    pub use_ipv4: bool,
    pub use_ipv6: bool,
    pub source_v4: Option<IpAddr>,
    pub source_v6: Option<IpAddr>,
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            period: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            privileged: false,
            use_ipv4: true,
            use_ipv6: false,
            source_v4: None,
            source_v6: None,
            queue_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn families(&self) -> Vec<Family> {
        let mut families = Vec::new();
        if self.use_ipv4 {
            families.push(Family::V4);
        }
        if self.use_ipv6 {
            families.push(Family::V6);
        }
        families
    }

    pub fn source(&self, family: Family) -> Option<IpAddr> {
        match family {
            Family::V4 => self.source_v4,
            Family::V6 => self.source_v6,
        }
    }
}

pub fn build_cli() -> Command {
    Command::new("echomon")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Periodically pings a set of hosts and reports latency and failures")
        .arg(
            Arg::new("targets")
                .help("Hosts to monitor, as HOST or HOST#TAG,TAG")
                .required(true)
                .num_args(1..)
                .value_parser(clap::value_parser!(TargetSpec))
        )
        .arg(
            Arg::new("period")
                .short('p')
                .long("period")
                .help("Milliseconds between probe rounds")
                .value_name("ms")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("timeout")
                .short('w')
                .long("timeout")
                .help("Milliseconds to wait for a reply; also the sweep period")
                .value_name("ms")
                .value_parser(clap::value_parser!(u64))
        )
        .arg(
            Arg::new("privileged")
                .long("privileged")
                .help("Use raw ICMP sockets (requires root or CAP_NET_RAW)")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("ipv6")
                .long("ipv6")
                .help("Also probe IPv6 addresses")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("force_ipv4")
                .short('4')
                .help("Probe IPv4 only")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("force_ipv6")
                .short('6')
                .help("Probe IPv6 only")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("source")
                .short('S')
                .long("source")
                .help("Source address to bind; may be given once per family")
                .value_name("srcaddr")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(IpAddr))
        )
        .arg(
            Arg::new("queue")
                .long("queue")
                .help("Capacity of the report queue")
                .value_name("n")
                .value_parser(clap::value_parser!(usize))
        )
}

pub fn parse_args() -> anyhow::Result<EngineConfig> {
    config_from_matches(&build_cli().get_matches())
}

pub fn config_from_matches(matches: &ArgMatches) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::default();

    if let Some(targets) = matches.get_many::<TargetSpec>("targets") {
        config.targets = targets.cloned().collect();
    }

    if let Some(period) = matches.get_one::<u64>("period") {
        config.period = Duration::from_millis(*period);
    }

    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = Duration::from_millis(*timeout);
    }

    if let Some(queue) = matches.get_one::<usize>("queue") {
        config.queue_capacity = *queue;
    }

    config.privileged = matches.get_flag("privileged");

    let force_ipv4 = matches.get_flag("force_ipv4");
    let force_ipv6 = matches.get_flag("force_ipv6");
    if force_ipv4 && force_ipv6 {
        return Err(anyhow::anyhow!("Cannot force both IPv4 and IPv6"));
    }
    config.use_ipv4 = !force_ipv6;
    config.use_ipv6 = force_ipv6 || (matches.get_flag("ipv6") && !force_ipv4);

    if let Some(sources) = matches.get_many::<IpAddr>("source") {
        for source in sources {
            let slot = match Family::of(source) {
                Family::V4 => &mut config.source_v4,
                Family::V6 => &mut config.source_v6,
            };
            if slot.replace(*source).is_some() {
                return Err(anyhow::anyhow!("More than one {} source address given", Family::of(source)));
            }
        }
    }

    Ok(config)
}
