use crate::error::AppError;
use crate::signal::LampCommand;
use std::io::Write;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const TERMINAL_COMMAND: &str = "EXIT";

/// Sink for lamp commands. Owned by the controller thread only.
pub trait SignalActuator: Send {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError>;
    /// Send the terminal command and release the channel.
    fn shutdown(&mut self) -> Result<(), AppError>;
}

impl SignalActuator for Box<dyn SignalActuator> {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError> {
        (**self).set_phase(command)
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        (**self).shutdown()
    }
}

/// Line protocol understood by the signal controller board: one
/// `<region>_<R|Y|G>_<ON|OFF>` line per lamp and `EXIT` on shutdown.
pub struct LineActuator<W: Write + Send> {
    writer: W,
    line_delay: Duration,
}

impl<W: Write + Send> LineActuator<W> {
    pub fn new(writer: W, line_delay: Duration) -> Self {
        Self { writer, line_delay }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn send_line(&mut self, line: &str) -> Result<(), AppError> {
        writeln!(self.writer, "{line}")
            .and_then(|_| self.writer.flush())
            .map_err(|err| AppError::Actuator(format!("write {line:?} failed: {err}")))?;
        if !self.line_delay.is_zero() {
            std::thread::sleep(self.line_delay);
        }
        Ok(())
    }
}

/// Serial port configured for the controller board: given baud rate, 8N1,
/// blocking writes.
#[cfg(target_os = "linux")]
pub struct SerialPort {
    uart: rppal::uart::Uart,
}

#[cfg(target_os = "linux")]
impl SerialPort {
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self, AppError> {
        use rppal::uart::{Parity, Uart};

        let path = path.as_ref();
        let open_failed =
            |err: rppal::uart::Error| AppError::Actuator(format!("open {} failed: {err}", path.display()));
        let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1).map_err(open_failed)?;
        uart.set_write_mode(true).map_err(open_failed)?;
        Ok(Self { uart })
    }
}

#[cfg(target_os = "linux")]
impl Write for SerialPort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.uart
            .write(buf)
            .map_err(|err| std::io::Error::other(err.to_string()))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.uart
            .drain()
            .map_err(|err| std::io::Error::other(err.to_string()))
    }
}

#[cfg(target_os = "linux")]
impl LineActuator<SerialPort> {
    pub fn open_serial(
        path: impl AsRef<Path>,
        baud: u32,
        line_delay: Duration,
    ) -> Result<Self, AppError> {
        Ok(Self::new(SerialPort::open(path, baud)?, line_delay))
    }
}

impl<W: Write + Send> SignalActuator for LineActuator<W> {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError> {
        for (lamp, lit) in [("R", command.red), ("Y", command.yellow), ("G", command.green)] {
            let state = if lit { "ON" } else { "OFF" };
            self.send_line(&format!("{}_{lamp}_{state}", command.region))?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        self.send_line(TERMINAL_COMMAND)
    }
}

/// Actuator for runs without signal hardware.
#[derive(Debug, Default)]
pub struct LogActuator;

impl SignalActuator for LogActuator {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError> {
        info!(
            region = %command.region,
            red = command.red,
            yellow = command.yellow,
            green = command.green,
            "Lamp command"
        );
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        info!("Signal actuator shut down");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct LampPins {
    pub red: u8,
    pub yellow: u8,
    pub green: u8,
}

/// Drives one red/yellow/green output triple per region.
#[cfg(target_os = "linux")]
pub struct GpioActuator {
    lamps: std::collections::HashMap<String, [rppal::gpio::OutputPin; 3]>,
}

#[cfg(target_os = "linux")]
impl GpioActuator {
    pub fn new(pins: &std::collections::BTreeMap<String, LampPins>) -> Result<Self, AppError> {
        let gpio = rppal::gpio::Gpio::new().map_err(|err| AppError::Gpio(err.to_string()))?;
        let output = |pin: u8| -> Result<rppal::gpio::OutputPin, AppError> {
            Ok(gpio
                .get(pin)
                .map_err(|err| AppError::Gpio(err.to_string()))?
                .into_output_low())
        };
        let mut lamps = std::collections::HashMap::new();
        for (region, lamp) in pins {
            lamps.insert(
                region.clone(),
                [output(lamp.red)?, output(lamp.yellow)?, output(lamp.green)?],
            );
        }
        Ok(Self { lamps })
    }
}

#[cfg(target_os = "linux")]
impl SignalActuator for GpioActuator {
    fn set_phase(&mut self, command: &LampCommand) -> Result<(), AppError> {
        let outputs = self
            .lamps
            .get_mut(&command.region)
            .ok_or_else(|| AppError::Gpio(format!("no pins for region {}", command.region)))?;
        for (pin, lit) in outputs
            .iter_mut()
            .zip([command.red, command.yellow, command.green])
        {
            if lit {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), AppError> {
        // Fail safe: all approaches red.
        for [red, yellow, green] in self.lamps.values_mut() {
            yellow.set_low();
            green.set_low();
            red.set_high();
        }
        Ok(())
    }
}
