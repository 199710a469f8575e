// Port-name reference entry (tcp_udp_ports table).

/// Service name registered for a transport port. Unique on `port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortNameEntry {
    pub port: u16,
    pub name: String,
}

/// Column width of `tcp_udp_ports.name`.
pub const MAX_SERVICE_NAME_LEN: usize = 64;
