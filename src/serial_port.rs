use std::{
    fs::{File, OpenOptions},
    io,
    os::{
        fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd},
        raw::c_void,
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use futures::ready;
use log::{info, warn};
use serialport::{SerialPortInfo, SerialPortType};
use termios::Termios;
use tokio::io::{AsyncRead, ReadBuf, unix::AsyncFd};

/// Baud rates the board's firmware can be built with.
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9600, 19200, 38400, 57600, 115200];

/// `SERIAL_PORT` value that selects the first USB serial port found.
pub const AUTO_PORT: &str = "auto";

fn port_type_name(port_type: &SerialPortType) -> &'static str {
    match port_type {
        SerialPortType::UsbPort(_) => "USB",
        SerialPortType::BluetoothPort => "Bluetooth",
        SerialPortType::PciPort => "PCI",
        SerialPortType::Unknown => "Unknown",
    }
}

/// Serial ports present on this host, logged at info.
pub fn list_ports() -> Vec<SerialPortInfo> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("枚举串口失败: {}", e);
            return Vec::new();
        }
    };
    if ports.is_empty() {
        info!("未发现可用串口");
    }
    for port in &ports {
        match &port.port_type {
            SerialPortType::UsbPort(usb) => info!(
                "可用串口: {} - USB (VID: 0x{:04x}, PID: 0x{:04x}) {}",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or("")
            ),
            other => info!("可用串口: {} - {}", port.port_name, port_type_name(other)),
        }
    }
    ports
}

/// First USB serial port in `ports`; the board enumerates as a USB CDC/serial bridge.
pub fn first_usb_port(ports: &[SerialPortInfo]) -> Option<String> {
    ports
        .iter()
        .find(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
        .map(|p| p.port_name.clone())
}

/// Maps the configured port to a device path, scanning for a USB port when it is [`AUTO_PORT`].
pub fn resolve_port(configured: &str) -> Option<String> {
    if configured.eq_ignore_ascii_case(AUTO_PORT) {
        first_usb_port(&list_ports())
    } else {
        Some(configured.to_string())
    }
}

fn speed_for(baud: u32) -> Option<libc::speed_t> {
    match baud {
        9600 => Some(libc::B9600),
        19200 => Some(libc::B19200),
        38400 => Some(libc::B38400),
        57600 => Some(libc::B57600),
        115200 => Some(libc::B115200),
        _ => None,
    }
}

struct Tty {
    fd: RawFd,
}

impl AsRawFd for Tty {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Tty {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        let r = unsafe { libc::read(self.as_raw_fd(), dst.as_mut_ptr() as *mut c_void, dst.len()) };
        if r < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(r as usize)
        }
    }
}

impl Drop for Tty {
    fn drop(&mut self) {
        drop(unsafe { File::from_raw_fd(self.fd) });
    }
}

/// Serial tty in raw mode, read through the tokio reactor.
pub struct SerialPort {
    raw: AsyncFd<Tty>,
}

impl SerialPort {
    pub fn open<P: AsRef<Path>>(path: P, baud: u32) -> io::Result<Self> {
        let speed = speed_for(baud).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported baud rate {}", baud),
            )
        })?;
        let tty = {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)?;
            Tty {
                fd: file.into_raw_fd(),
            }
        };
        {
            let mut attrs = Termios::from_fd(tty.fd)?;
            termios::cfmakeraw(&mut attrs);
            attrs.c_cflag |= termios::CLOCAL | termios::CREAD;
            termios::cfsetspeed(&mut attrs, speed)?;
            termios::tcsetattr(tty.fd, termios::TCSAFLUSH, &attrs)?;
        }

        Ok(SerialPort {
            raw: AsyncFd::new(tty)?,
        })
    }
}

impl AsyncRead for SerialPort {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.raw.poll_read_ready(cx))?;
            let dst = buf.initialize_unfilled();
            match guard.try_io(|raw| raw.get_ref().read(dst)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    break Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => break Poll::Ready(Err(e)),
                Err(_) => continue,
            }
        }
    }
}
