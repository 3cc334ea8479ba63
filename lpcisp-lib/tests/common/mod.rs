#![allow(dead_code)]

use lpcisp_lib::codec::TransferCodec;
use lpcisp_lib::transport::LineTransport;
use lpcisp_lib::{Error, IspConfig, IspSession, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub const CRYSTAL_KHZ: u32 = 12000;

#[derive(Default)]
struct Script {
    replies: VecDeque<String>,
    written: Vec<u8>,
    baud: Option<u32>,
}

/// 按脚本回放设备输出的传输层，记录主机写出的全部字节。
/// 克隆共享同一份脚本，测试可以在会话持有传输层时检查写出内容。
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Rc<RefCell<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设备输出一行
    pub fn reply(&self, line: &str) -> &Self {
        self.script.borrow_mut().replies.push_back(line.to_string());
        self
    }

    pub fn replies(&self, lines: &[&str]) -> &Self {
        for line in lines {
            self.reply(line);
        }
        self
    }

    /// 握手的三行应答
    pub fn sync(&self, crystal_khz: u32) -> &Self {
        self.replies(&[
            "Synchronized",
            "Synchronized\rOK",
            &format!("{}\rOK", crystal_khz),
        ])
    }

    /// 回显命令行，再输出状态行和数据行
    pub fn command(&self, line: &str, response: &[&str]) -> &Self {
        self.reply(line);
        self.replies(response)
    }

    pub fn written(&self) -> Vec<u8> {
        self.script.borrow().written.clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.script.borrow().written).into_owned()
    }

    pub fn written_len(&self) -> usize {
        self.script.borrow().written.len()
    }

    pub fn clear_written(&self) {
        self.script.borrow_mut().written.clear();
    }

    /// 主机写出的行（按 `\r\n` 切分，握手的 `?` 单独成行）
    pub fn written_lines(&self) -> Vec<String> {
        let text = self.written_text();
        let text = text.strip_prefix('?').unwrap_or(&text);
        text.split("\r\n")
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.borrow().replies.len()
    }

    pub fn baud(&self) -> Option<u32> {
        self.script.borrow().baud
    }

    pub fn handles(&self) -> usize {
        Rc::strong_count(&self.script)
    }
}

impl LineTransport for ScriptedTransport {
    fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.script.borrow_mut().written.extend_from_slice(data);
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        self.script
            .borrow_mut()
            .replies
            .pop_front()
            .ok_or_else(|| Error::timeout("reading a scripted line"))
    }

    fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        let line = self.read_line()?;
        Ok(line.into_bytes().into_iter().take(n).collect())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.script.borrow_mut().baud = Some(baud);
        Ok(())
    }
}

/// 已同步的会话，以及用于继续编写脚本的句柄
pub fn connected(config: IspConfig) -> (IspSession<ScriptedTransport>, ScriptedTransport) {
    let transport = ScriptedTransport::new();
    transport.sync(config.crystal_khz);
    if !config.echo {
        transport.command("A 0", &["0"]);
    }
    let handle = transport.clone();
    let session = IspSession::connect(transport, config).expect("scripted sync");
    handle.clear_written();
    (session, handle)
}

pub fn config() -> IspConfig {
    IspConfig {
        crystal_khz: CRYSTAL_KHZ,
        ..IspConfig::default()
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

/// 脚本化 `R` 命令：回显、状态、编码行和校验行，回显开启时还包括主机 `OK` 的回显
pub fn script_read(transport: &ScriptedTransport, address: u32, data: &[u8], echo: bool) {
    let codec = TransferCodec::default();
    let command = format!("R {} {}", address, data.len());
    if echo {
        transport.reply(&command);
    }
    transport.reply("0");
    for block in codec.encode_blocks(data) {
        for line in &block.lines {
            transport.reply(line);
        }
        transport.reply(&block.checksum.to_string());
        if echo {
            transport.reply("OK");
        }
    }
}

/// 脚本化 `W` 命令：每行回显，块尾设备回答 OK
pub fn script_write(transport: &ScriptedTransport, address: u32, data: &[u8]) {
    let codec = TransferCodec::default();
    transport.command(&format!("W {} {}", address, data.len()), &["0"]);
    for block in codec.encode_blocks(data) {
        for line in &block.lines {
            transport.reply(line);
        }
        transport.reply(&block.checksum.to_string());
        transport.reply("OK");
    }
}
