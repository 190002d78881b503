use std::collections::HashSet;

/// Lowest port above `base` that is not in `in_use`.
///
/// Callers must hold the registry lock that produced `in_use`, otherwise two
/// launches can be handed the same port.
pub fn allocate_vnc_port(base: u16, in_use: &HashSet<u16>) -> Option<u16> {
    let mut port = base.checked_add(1)?;
    while in_use.contains(&port) {
        port = port.checked_add(1)?;
    }
    Some(port)
}

pub fn endpoint_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}
