//! UU 编码的数据传输
//!
//! `W`/`R` 命令的数据以 UU 编码行传输：每行最多 45 字节，首字符为长度，
//! 每 3 字节编码为 4 个可打印字符，最后不足 3 字节的分组补零。
//! 每 `lines_per_block` 行（以及最后一个不足的块）之后跟一行十进制校验和，
//! 为该块原始字节之和。

use crate::{Error, Result};

/// 每行最多承载的原始字节数
pub const UU_LINE_BYTES: usize = 45;

/// 每个校验块的默认行数
pub const UU_LINES_PER_BLOCK: usize = 20;

fn encode_char(value: u8) -> char {
    let value = value & 0x3F;
    if value == 0 { '`' } else { (0x20 + value) as char }
}

fn decode_char(c: u8) -> Result<u8> {
    if !(0x20..=0x60).contains(&c) {
        return Err(Error::protocol(format!(
            "invalid character {:?} in transfer line",
            c as char
        )));
    }
    Ok((c - 0x20) & 0x3F)
}

/// 块内原始字节的校验和
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |sum, &b| sum.wrapping_add(b as u32))
}

/// 编码一行（`data.len() <= 45`）
pub fn encode_line(data: &[u8]) -> String {
    debug_assert!(data.len() <= UU_LINE_BYTES);
    let mut line = String::with_capacity(1 + data.len().div_ceil(3) * 4);
    line.push(encode_char(data.len() as u8));
    for group in data.chunks(3) {
        let b0 = group[0];
        let b1 = group.get(1).copied().unwrap_or(0);
        let b2 = group.get(2).copied().unwrap_or(0);
        line.push(encode_char(b0 >> 2));
        line.push(encode_char((b0 << 4) | (b1 >> 4)));
        line.push(encode_char((b1 << 2) | (b2 >> 6)));
        line.push(encode_char(b2));
    }
    line
}

/// 解码一行
pub fn decode_line(line: &str) -> Result<Vec<u8>> {
    let bytes = line.as_bytes();
    let Some((&len_char, body)) = bytes.split_first() else {
        return Err(Error::protocol("empty transfer line"));
    };
    let len = decode_char(len_char)? as usize;
    if len > UU_LINE_BYTES {
        return Err(Error::protocol(format!("transfer line length {} exceeds 45", len)));
    }
    let needed = len.div_ceil(3) * 4;
    if body.len() != needed {
        return Err(Error::protocol(format!(
            "transfer line has {} characters for {} bytes, expected {}",
            body.len(),
            len,
            needed
        )));
    }

    let mut data = Vec::with_capacity(len + 2);
    for group in body.chunks(4) {
        let c0 = decode_char(group[0])?;
        let c1 = decode_char(group[1])?;
        let c2 = decode_char(group[2])?;
        let c3 = decode_char(group[3])?;
        data.push((c0 << 2) | (c1 >> 4));
        data.push((c1 << 4) | (c2 >> 2));
        data.push((c2 << 6) | c3);
    }
    // 最后一组的填充位必须为零
    if data[len..].iter().any(|&b| b != 0) {
        return Err(Error::protocol("non-zero padding in transfer line"));
    }
    data.truncate(len);
    Ok(data)
}

fn parse_checksum(line: &str) -> Result<u32> {
    line.trim()
        .parse::<u32>()
        .map_err(|_| Error::protocol(format!("expected a checksum line, got {:?}", line)))
}

/// 一个校验块：若干编码行及其校验和
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBlock {
    pub lines: Vec<String>,
    pub checksum: u32,
}

/// 逐行累积解码并在块尾校验
#[derive(Debug, Default)]
pub struct BlockDecoder {
    data: Vec<u8>,
    block: usize,
    block_start: usize,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Result<()> {
        let bytes = decode_line(line)?;
        self.data.extend_from_slice(&bytes);
        Ok(())
    }

    /// 当前块已解码的字节数
    pub fn pending(&self) -> usize {
        self.data.len() - self.block_start
    }

    /// 用校验行结束当前块。校验失败时丢弃本块数据，调用方可请求重发
    pub fn finish_block(&mut self, checksum_line: &str) -> Result<()> {
        let expected = parse_checksum(checksum_line)?;
        let actual = checksum(&self.data[self.block_start..]);
        if expected != actual {
            self.discard_block();
            return Err(Error::ChecksumMismatch {
                block: self.block,
                expected,
                actual,
            });
        }
        self.block += 1;
        self.block_start = self.data.len();
        Ok(())
    }

    /// 解码一个完整块并校验。数据行损坏、字节数与 `expected_len` 不符或校验和不一致时
    /// 丢弃本块，返回的错误都可以通过重发恢复
    pub fn push_block<S: AsRef<str>>(
        &mut self,
        lines: &[S],
        checksum_line: &str,
        expected_len: Option<usize>,
    ) -> Result<()> {
        for line in lines {
            if let Err(e) = self.push_line(line.as_ref()) {
                self.discard_block();
                return Err(Error::CorruptBlock {
                    block: self.block,
                    reason: e.to_string(),
                });
            }
        }
        if let Some(expected) = expected_len
            && self.pending() != expected
        {
            let reason = format!("decoded {} bytes, expected {}", self.pending(), expected);
            self.discard_block();
            return Err(Error::CorruptBlock {
                block: self.block,
                reason,
            });
        }
        self.finish_block(checksum_line)
    }

    pub fn discard_block(&mut self) {
        self.data.truncate(self.block_start);
    }

    pub fn block_index(&self) -> usize {
        self.block
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferCodec {
    lines_per_block: usize,
}

impl Default for TransferCodec {
    fn default() -> Self {
        Self::new(UU_LINES_PER_BLOCK)
    }
}

impl TransferCodec {
    pub fn new(lines_per_block: usize) -> Self {
        Self {
            lines_per_block: lines_per_block.max(1),
        }
    }

    pub fn lines_per_block(&self) -> usize {
        self.lines_per_block
    }

    pub fn block_bytes(&self) -> usize {
        self.lines_per_block * UU_LINE_BYTES
    }

    /// 每个块承载的字节数，用于按块流式收发
    pub fn block_sizes(&self, len: usize) -> Vec<usize> {
        let block = self.block_bytes();
        let mut sizes = vec![block; len / block];
        if len % block != 0 {
            sizes.push(len % block);
        }
        sizes
    }

    pub fn encode_blocks(&self, data: &[u8]) -> Vec<EncodedBlock> {
        data.chunks(self.block_bytes())
            .map(|block| EncodedBlock {
                lines: block.chunks(UU_LINE_BYTES).map(encode_line).collect(),
                checksum: checksum(block),
            })
            .collect()
    }

    /// 编码为完整行序列，每块之后插入校验行
    pub fn encode(&self, data: &[u8]) -> Vec<String> {
        self.encode_blocks(data)
            .into_iter()
            .flat_map(|block| {
                let checksum = block.checksum.to_string();
                block.lines.into_iter().chain(std::iter::once(checksum))
            })
            .collect()
    }

    /// 解码 [`encode`](Self::encode) 产生的行序列，遇到第一个校验不一致即失败
    /// 除最后一块外，每块都必须是满块
    pub fn decode<S: AsRef<str>>(&self, lines: &[S]) -> Result<Vec<u8>> {
        let mut decoder = BlockDecoder::new();
        let mut blocks = lines.chunks(self.lines_per_block + 1).peekable();
        while let Some(block) = blocks.next() {
            let Some((checksum_line, data_lines)) = block.split_last() else {
                continue;
            };
            if data_lines.is_empty() {
                return Err(Error::protocol("transfer block without data lines"));
            }
            let expected_len = blocks.peek().map(|_| self.block_bytes());
            decoder.push_block(data_lines, checksum_line.as_ref(), expected_len)?;
        }
        Ok(decoder.into_data())
    }
}
