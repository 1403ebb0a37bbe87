// ── USB robot detection ──
//
// A Reachy Mini on USB enumerates as a CH340 USB-to-serial bridge. Used
// to pick the serial device for direct mode when none is configured.

use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, warn};

/// CH340 bridge vendor id.
pub const ROBOT_USB_VID: u16 = 0x1a86;
/// CH340 bridge product id as flashed on the robot.
pub const ROBOT_USB_PID: u16 = 0x55d3;

/// Serial device of the first attached robot, if any.
///
/// Enumeration failures are logged and reported as no robot found.
pub fn detect_robot_port() -> Option<String> {
    match serialport::available_ports() {
        Ok(ports) => {
            let found = find_robot_port(&ports);
            debug!(candidates = ports.len(), port = ?found, "scanned serial ports");
            found
        }
        Err(e) => {
            warn!(error = %e, "could not enumerate serial ports");
            None
        }
    }
}

/// First port whose USB ids match the robot.
pub fn find_robot_port(ports: &[SerialPortInfo]) -> Option<String> {
    ports.iter().find_map(|port| match &port.port_type {
        SerialPortType::UsbPort(usb) if usb.vid == ROBOT_USB_VID && usb.pid == ROBOT_USB_PID => {
            Some(port.port_name.clone())
        }
        _ => None,
    })
}
