//! 行传输层
//!
//! ISP 协议是基于行的文本协议：命令和大部分响应都是以 `\r\n` 结尾的 ASCII 行，
//! 只有握手时的 `?` 是不带行尾的裸字节。

use crate::{Error, Result};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// 协议固定的行尾
pub const ISP_EOL: &str = "\r\n";

/// 默认读超时
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// 会话独占的行传输接口
pub trait LineTransport {
    /// 写入原始字节，不追加行尾
    fn write_raw(&mut self, data: &[u8]) -> Result<()>;

    /// 读取一行，去掉结尾的 `\r\n`，保留行内的 `\r`。超时返回 [`Error::Timeout`]
    fn read_line(&mut self) -> Result<String>;

    /// 精确读取 `n` 个字节
    fn read_raw(&mut self, n: usize) -> Result<Vec<u8>>;

    /// 设备切换波特率成功后，同步切换主机侧
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_raw(format!("{}{}", line, ISP_EOL).as_bytes())
    }
}

impl<T: LineTransport + ?Sized> LineTransport for Box<T> {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_raw(data)
    }

    fn read_line(&mut self) -> Result<String> {
        (**self).read_line()
    }

    fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read_raw(n)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }
}

/// 去掉行尾的 `\n` 及其前面的一个 `\r`
pub fn trim_eol(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// 基于 `serialport` 的传输实现，drop 时关闭串口
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// 以 8N1、无流控打开串口
    pub fn open(port_name: &str, baud: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()?;

        tracing::info!("Opened serial port {} at {} baud", port_name, baud);

        Ok(Self { port })
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    /// 拉低 ISP 选择脚（RTS）的同时用 DTR 复位，让芯片进入 ISP 模式
    pub fn enter_isp(&mut self) -> Result<()> {
        tracing::debug!("Resetting into ISP mode");
        self.port.write_request_to_send(true)?;
        self.port.write_data_terminal_ready(true)?;
        std::thread::sleep(Duration::from_millis(100));
        self.port.write_data_terminal_ready(false)?;
        std::thread::sleep(Duration::from_millis(100));
        self.port.write_request_to_send(false)?;
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// 释放 ISP 选择脚后复位，运行用户程序
    pub fn reset_to_user(&mut self) -> Result<()> {
        tracing::debug!("Resetting into user code");
        self.port.write_request_to_send(false)?;
        self.port.write_data_terminal_ready(true)?;
        std::thread::sleep(Duration::from_millis(100));
        self.port.write_data_terminal_ready(false)?;
        Ok(())
    }

    fn map_read_error(e: std::io::Error, context: &str) -> Error {
        if e.kind() == std::io::ErrorKind::TimedOut {
            Error::timeout(context)
        } else {
            Error::Io(e)
        }
    }
}

impl LineTransport for SerialTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut buffer = Vec::new();
        loop {
            let mut byte = [0];
            self.port
                .read_exact(&mut byte)
                .map_err(|e| Self::map_read_error(e, "reading a response line"))?;
            buffer.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        let line = trim_eol(&buffer);
        tracing::trace!("<< {:?}", line);
        Ok(line)
    }

    fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; n];
        self.port
            .read_exact(&mut buffer)
            .map_err(|e| Self::map_read_error(e, "reading raw bytes"))?;
        Ok(buffer)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port.set_baud_rate(baud)?;
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}
