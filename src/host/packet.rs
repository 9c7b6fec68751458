//! 主机命令 protocol v3 数据包
//!
//! 请求: 8 字节头 + 数据
//! ```text
//! 0: struct_version (= 3)
//! 1: checksum
//! 2: command (u16 LE)
//! 4: command_version
//! 5: reserved (= 0)
//! 6: data_len (u16 LE)
//! ```
//! 响应: 8 字节头 + 数据
//! ```text
//! 0: struct_version (= 3)
//! 1: checksum
//! 2: result (u16 LE)
//! 4: data_len (u16 LE)
//! 6: reserved (u16, = 0)
//! ```
//! 校验和使头与数据所有字节之和为 0 (mod 256)

use super::{EcStatus, HostCommandTable};
use crate::config::HOST_PACKET_SIZE;
use crate::log_warn;

/// 请求头版本
pub const EC_HOST_REQUEST_VERSION: u8 = 3;
/// 响应头版本
pub const EC_HOST_RESPONSE_VERSION: u8 = 3;
/// 请求头长度
pub const REQUEST_HEADER_SIZE: usize = 8;
/// 响应头长度
pub const RESPONSE_HEADER_SIZE: usize = 8;

/// 所有字节之和
pub fn checksum_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// 请求头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub command: u16,
    pub command_version: u8,
    pub data_len: u16,
}

impl RequestHeader {
    /// 解析并校验一个完整请求
    ///
    /// # Returns
    /// 请求头和请求数据
    pub fn parse(request: &[u8]) -> Result<(Self, &[u8]), EcStatus> {
        if request.len() < REQUEST_HEADER_SIZE {
            return Err(EcStatus::RequestTruncated);
        }
        if request[0] != EC_HOST_REQUEST_VERSION || request[5] != 0 {
            return Err(EcStatus::InvalidHeader);
        }

        let header = Self {
            command: u16::from_le_bytes([request[2], request[3]]),
            command_version: request[4],
            data_len: u16::from_le_bytes([request[6], request[7]]),
        };

        let total = REQUEST_HEADER_SIZE + header.data_len as usize;
        if total > HOST_PACKET_SIZE {
            return Err(EcStatus::InvalidHeader);
        }
        let packet = request.get(..total).ok_or(EcStatus::RequestTruncated)?;
        if checksum_sum(packet) != 0 {
            return Err(EcStatus::InvalidChecksum);
        }

        Ok((header, &packet[REQUEST_HEADER_SIZE..]))
    }
}

/// 构造请求包 (主机侧, 测试与工具使用)
///
/// # Returns
/// 包长度; `out` 不足时返回 `None`
pub fn encode_request(command: u16, version: u8, data: &[u8], out: &mut [u8]) -> Option<usize> {
    let total = REQUEST_HEADER_SIZE + data.len();
    let data_len = u16::try_from(data.len()).ok()?;
    let packet = out.get_mut(..total)?;

    packet[0] = EC_HOST_REQUEST_VERSION;
    packet[1] = 0;
    packet[2..4].copy_from_slice(&command.to_le_bytes());
    packet[4] = version;
    packet[5] = 0;
    packet[6..8].copy_from_slice(&data_len.to_le_bytes());
    packet[REQUEST_HEADER_SIZE..].copy_from_slice(data);
    packet[1] = checksum_sum(packet).wrapping_neg();
    Some(total)
}

/// 写响应头 (数据已位于 `out[RESPONSE_HEADER_SIZE..][..data_len]`)
fn finish_response(out: &mut [u8], status: EcStatus, data_len: usize) -> usize {
    let total = RESPONSE_HEADER_SIZE + data_len;
    let packet = &mut out[..total];

    packet[0] = EC_HOST_RESPONSE_VERSION;
    packet[1] = 0;
    packet[2..4].copy_from_slice(&status.code().to_le_bytes());
    packet[4..6].copy_from_slice(&(data_len as u16).to_le_bytes());
    packet[6..8].copy_from_slice(&0u16.to_le_bytes());
    packet[1] = checksum_sum(packet).wrapping_neg();
    total
}

/// 处理一个请求包, 把响应包写入 `response`
///
/// 协议层错误也会生成只有头的响应包
///
/// # Returns
/// 响应包长度; `response` 连响应头都放不下时返回 0
pub fn process_packet<const N: usize>(
    table: &HostCommandTable<N>,
    request: &[u8],
    response: &mut [u8],
) -> usize {
    if response.len() < RESPONSE_HEADER_SIZE {
        return 0;
    }

    let (header, params) = match RequestHeader::parse(request) {
        Ok(parsed) => parsed,
        Err(status) => {
            log_warn!("host packet rejected: {}", status.code());
            return finish_response(response, status, 0);
        }
    };

    // 处理函数按协议最大响应写入暂存区, 再检查传输缓冲区能否容纳
    let mut scratch = [0u8; HOST_PACKET_SIZE - RESPONSE_HEADER_SIZE];
    let result = table.process(header.command, header.command_version, params, &mut scratch);

    let room = response.len() - RESPONSE_HEADER_SIZE;
    if result.size > room {
        return finish_response(response, EcStatus::ResponseTooBig, 0);
    }

    response[RESPONSE_HEADER_SIZE..][..result.size].copy_from_slice(&scratch[..result.size]);
    finish_response(response, result.status, result.size)
}

/// 解析响应包 (主机侧)
///
/// # Returns
/// 结果码和响应数据
pub fn parse_response(packet: &[u8]) -> Result<(EcStatus, &[u8]), EcStatus> {
    if packet.len() < RESPONSE_HEADER_SIZE {
        return Err(EcStatus::RequestTruncated);
    }
    if packet[0] != EC_HOST_RESPONSE_VERSION {
        return Err(EcStatus::InvalidHeader);
    }
    let status = EcStatus::from_u16(u16::from_le_bytes([packet[2], packet[3]]))
        .ok_or(EcStatus::InvalidHeader)?;
    let data_len = u16::from_le_bytes([packet[4], packet[5]]) as usize;
    let total = RESPONSE_HEADER_SIZE + data_len;
    let packet = packet.get(..total).ok_or(EcStatus::RequestTruncated)?;
    if checksum_sum(packet) != 0 {
        return Err(EcStatus::InvalidChecksum);
    }
    Ok((status, &packet[RESPONSE_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::super::*;
    use super::*;

    fn echo(args: &mut HostCmdArgs<'_>) -> EcStatus {
        let len = args.params.len();
        args.response[..len].copy_from_slice(args.params);
        args.response_size = len;
        EcStatus::Success
    }

    crate::declare_host_commands! {
        static COMMANDS = [
            (EC_CMD_HELLO, host_command_hello, ec_ver_mask(0)),
            (0x0200, echo, ec_ver_mask(0)),
        ];
    }

    #[test]
    fn test_hello_round_trip() {
        let mut request = [0u8; 16];
        let len = encode_request(EC_CMD_HELLO, 0, &0x1000_0000u32.to_le_bytes(), &mut request).unwrap();
        assert_eq!(len, 12);
        assert_eq!(checksum_sum(&request[..len]), 0);

        let mut response = [0u8; 32];
        let n = process_packet(&COMMANDS, &request[..len], &mut response);
        assert_eq!(n, 12);

        let (status, data) = parse_response(&response[..n]).unwrap();
        assert_eq!(status, EcStatus::Success);
        assert_eq!(data, &0x1102_0304u32.to_le_bytes());
    }

    #[test]
    fn test_bad_checksum() {
        let mut request = [0u8; 16];
        let len = encode_request(EC_CMD_HELLO, 0, &[1, 2, 3, 4], &mut request).unwrap();
        request[9] ^= 0xff;

        let mut response = [0u8; 16];
        let n = process_packet(&COMMANDS, &request[..len], &mut response);
        assert_eq!(parse_response(&response[..n]), Ok((EcStatus::InvalidChecksum, &[][..])));
    }

    #[test]
    fn test_header_errors() {
        assert_eq!(RequestHeader::parse(&[3, 0, 1]), Err(EcStatus::RequestTruncated));

        let mut request = [0u8; 16];
        let len = encode_request(EC_CMD_HELLO, 0, &[0; 4], &mut request).unwrap();

        let mut bad_version = request;
        bad_version[0] = 2;
        assert_eq!(RequestHeader::parse(&bad_version[..len]), Err(EcStatus::InvalidHeader));

        // data_len 比实际数据长
        assert_eq!(RequestHeader::parse(&request[..len - 1]), Err(EcStatus::RequestTruncated));
    }

    #[test]
    fn test_response_too_big_for_transport() {
        let data = [0x5au8; 12];
        let mut request = [0u8; 32];
        let len = encode_request(0x0200, 0, &data, &mut request).unwrap();

        let mut response = [0u8; RESPONSE_HEADER_SIZE + 8];
        let n = process_packet(&COMMANDS, &request[..len], &mut response);
        assert_eq!(n, RESPONSE_HEADER_SIZE);
        assert_eq!(parse_response(&response[..n]).unwrap().0, EcStatus::ResponseTooBig);

        let mut tiny = [0u8; 4];
        assert_eq!(process_packet(&COMMANDS, &request[..len], &mut tiny), 0);
    }
}
