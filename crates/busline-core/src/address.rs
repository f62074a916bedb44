//! Bus address resolution.
//!
//! Resolution only decides *where* to connect; dialing and autolaunch
//! discovery belong to transport implementations.

use std::env;

/// Default system bus socket on the platform.
pub const DEFAULT_SYSTEM_BUS_ADDRESS: &str = "unix:path=/var/run/dbus/system_bus_socket";

/// Environment variable naming the session bus address.
pub const SESSION_BUS_ADDRESS_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Environment variable overriding the system bus address.
pub const SYSTEM_BUS_ADDRESS_ENV: &str = "DBUS_SYSTEM_BUS_ADDRESS";

/// A resolved bus address, prior to any dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusAddress {
    /// A concrete address string (e.g. `unix:path=/run/user/1000/bus`).
    /// Address-string parsing is the transport's job.
    Address(String),
    /// The address must be discovered via platform autolaunch.
    Autolaunch,
}

/// Resolve the session bus address from the environment.
///
/// An unset or empty `DBUS_SESSION_BUS_ADDRESS`, or the literal
/// `autolaunch:`, triggers platform autolaunch discovery.
pub fn session_bus_address() -> BusAddress {
    match env::var(SESSION_BUS_ADDRESS_ENV) {
        Ok(addr) if !addr.is_empty() && addr != "autolaunch:" => BusAddress::Address(addr),
        _ => BusAddress::Autolaunch,
    }
}

/// Resolve the system bus address: the environment override if set,
/// otherwise the fixed platform socket.
pub fn system_bus_address() -> BusAddress {
    match env::var(SYSTEM_BUS_ADDRESS_ENV) {
        Ok(addr) if !addr.is_empty() => BusAddress::Address(addr),
        _ => BusAddress::Address(DEFAULT_SYSTEM_BUS_ADDRESS.to_string()),
    }
}
