//! Raspberry Pi UART and GPIO backends (feature `hardware`, Linux only).

use std::time::{Duration, Instant};

use rppal::gpio::Gpio;
use rppal::uart::{Parity, Queue, Uart};

use crate::error::LinkError;
use crate::transport::SerialLink;

fn map_uart(e: rppal::uart::Error) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

/// Hardware serial link on the Pi's UART pins.
pub struct UartLink {
    uart: Uart,
}

impl UartLink {
    pub fn open(path: &str, baud: u32) -> Result<Self, LinkError> {
        let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1).map_err(map_uart)?;
        // Return from read as soon as any byte arrives; the exact-length
        // loop below enforces the overall deadline.
        uart.set_read_mode(0, Duration::from_millis(10))
            .map_err(map_uart)?;
        Ok(Self { uart })
    }
}

impl SerialLink for UartLink {
    fn clear_input(&mut self) -> std::io::Result<()> {
        self.uart.flush(Queue::Input).map_err(map_uart)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let mut written = 0;
        while written < buf.len() {
            written += self.uart.write(&buf[written..]).map_err(map_uart)?;
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), LinkError> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .uart
                .read(&mut buf[filled..])
                .map_err(|e| LinkError::Io(map_uart(e)))?;
            filled += n;
            if filled < buf.len() && Instant::now() >= deadline {
                return Err(LinkError::Timeout);
            }
        }
        Ok(())
    }
}

/// Pulse the microcontroller's RUN line low to reboot its firmware into a
/// known state before the first exchange.
pub fn reset_controller(pin: u8) -> Result<(), LinkError> {
    let gpio = Gpio::new().map_err(|e| LinkError::Io(std::io::Error::other(e.to_string())))?;
    let mut run = gpio
        .get(pin)
        .map_err(|e| LinkError::Io(std::io::Error::other(e.to_string())))?
        .into_output();
    run.set_low();
    std::thread::sleep(Duration::from_millis(100));
    run.set_high();
    // Let the firmware finish booting before the host starts polling.
    std::thread::sleep(Duration::from_millis(500));
    tracing::info!(pin, "controller reset");
    Ok(())
}
