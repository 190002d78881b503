use std::{net::IpAddr, time::Duration};

const DEFAULT_MAX_INSTANCES: usize = 10;
const DEFAULT_AGENT_PORT: u16 = 8080;
const DEFAULT_VNC_BASE_PORT: u16 = 5900;
const DEFAULT_READY_ATTEMPTS: u32 = 45;
const DEFAULT_READY_POLL_MS: u64 = 1000;
const DEFAULT_STOP_GRACE_SEC: u64 = 10;
const DEFAULT_MEMORY_LIMIT_BYTES: i64 = 2 * 1024 * 1024 * 1024; // 2 GiB
const CPU_PERIOD_US: i64 = 100_000;

pub const DEFAULT_READY_MARKERS: &[&str] = &["Brood War", "Lobby", "StarCraft"];

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_instances: usize,
    /// Host advertised in VNC URLs.
    pub host_ip: String,
    pub bind_addr: IpAddr,
    pub listen_port: u16,
    pub vnc_base_port: u16,
    pub image: String,
    pub network: Option<String>,
    pub vnc_resolution: String,
    pub container_port: u16,
    pub memory_limit_bytes: i64,
    pub cpu_period_us: i64,
    pub cpu_quota_us: i64,
    pub cap_add: Vec<String>,
    pub ready_attempts: u32,
    pub ready_poll_interval: Duration,
    pub ready_markers: Vec<String>,
    pub stop_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_instances: DEFAULT_MAX_INSTANCES,
            host_ip: "localhost".to_string(),
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            listen_port: DEFAULT_AGENT_PORT,
            vnc_base_port: DEFAULT_VNC_BASE_PORT,
            image: "psvs/starcraft-game:latest".to_string(),
            network: Some("psvs-network".to_string()),
            vnc_resolution: "1024x768".to_string(),
            container_port: 8080,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            cpu_period_us: CPU_PERIOD_US,
            // 1 core.
            cpu_quota_us: CPU_PERIOD_US,
            cap_add: vec!["SYS_PTRACE".to_string()],
            ready_attempts: DEFAULT_READY_ATTEMPTS,
            ready_poll_interval: Duration::from_millis(DEFAULT_READY_POLL_MS),
            ready_markers: DEFAULT_READY_MARKERS.iter().map(|m| m.to_string()).collect(),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SEC),
        }
    }
}

fn parse_num<T: std::str::FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.trim().parse::<T>().ok())
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Unparseable values
    /// fall back to defaults; numeric values are clamped.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        let max_instances = parse_num::<usize>(lookup("MAX_INSTANCES"))
            .map(|v| v.clamp(1, 1000))
            .unwrap_or(d.max_instances);
        let host_ip = non_empty(lookup("HOST_IP")).unwrap_or(d.host_ip);
        let bind_addr = parse_num::<IpAddr>(lookup("ARENA_BIND_ADDR")).unwrap_or(d.bind_addr);
        let listen_port = parse_num::<u16>(lookup("AGENT_PORT"))
            .filter(|p| *p != 0)
            .unwrap_or(d.listen_port);
        let vnc_base_port =
            parse_num::<u16>(lookup("ARENA_VNC_BASE_PORT")).unwrap_or(d.vnc_base_port);
        let image = non_empty(lookup("ARENA_GAME_IMAGE")).unwrap_or(d.image);
        // Explicitly empty means "use the runtime's default network".
        let network = match lookup("ARENA_NETWORK") {
            Some(v) => non_empty(Some(v)),
            None => d.network,
        };
        let vnc_resolution = non_empty(lookup("ARENA_VNC_RESOLUTION")).unwrap_or(d.vnc_resolution);
        let ready_attempts = parse_num::<u32>(lookup("ARENA_READY_ATTEMPTS"))
            .map(|v| v.clamp(1, 3600))
            .unwrap_or(d.ready_attempts);
        let ready_poll_interval = parse_num::<u64>(lookup("ARENA_READY_POLL_MS"))
            .map(|v| Duration::from_millis(v.clamp(100, 60_000)))
            .unwrap_or(d.ready_poll_interval);
        let stop_grace = parse_num::<u64>(lookup("ARENA_STOP_GRACE_SEC"))
            .map(|v| Duration::from_secs(v.clamp(1, 300)))
            .unwrap_or(d.stop_grace);
        let ready_markers = lookup("ARENA_READY_MARKERS")
            .map(|raw| {
                raw.split(',')
                    .map(|m| m.trim())
                    .filter(|m| !m.is_empty())
                    .map(|m| m.to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|m| !m.is_empty())
            .unwrap_or(d.ready_markers);

        Self {
            max_instances,
            host_ip,
            bind_addr,
            listen_port,
            vnc_base_port,
            image,
            network,
            vnc_resolution,
            ready_attempts,
            ready_poll_interval,
            ready_markers,
            stop_grace,
            ..d
        }
    }
}
