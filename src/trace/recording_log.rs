use crate::{
    error::{HarnessError, Result},
    kernel_abi::SupportedArch,
    syscall_classifier::classify,
    trace::syscall_record::SyscallRecord,
};
use serde::{Deserialize, Serialize};
use std::{
    convert::TryInto,
    fmt::{self, Display, Formatter},
};

pub const LOG_MAGIC: &[u8; 8] = b"SYSRPLOG";
pub const LOG_FORMAT_VERSION: u32 = 1;
const ENTRY_TAG: u8 = 0xE5;
const TRAILER_TAG: u8 = 0x5E;
const NO_PAYLOAD: u32 = u32::MAX;

/// Random tag generated when a recording starts. A replay only ever addresses
/// records through the id of the log it was armed with.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new_random() -> SessionId {
        SessionId(rand::random())
    }

    pub fn from_raw(id: u64) -> SessionId {
        SessionId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Append-only arena of the syscalls seen during one recording.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordingLog {
    session_id: SessionId,
    arch: SupportedArch,
    records: Vec<SyscallRecord>,
    sealed: bool,
}

impl RecordingLog {
    pub fn new(arch: SupportedArch) -> RecordingLog {
        Self::with_session_id(SessionId::new_random(), arch)
    }

    pub fn with_session_id(session_id: SessionId, arch: SupportedArch) -> RecordingLog {
        RecordingLog {
            session_id,
            arch,
            records: Vec::new(),
            sealed: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Sequence number the next appended record must carry.
    pub fn next_sequence_number(&self) -> u64 {
        self.len()
    }

    pub fn records(&self) -> &[SyscallRecord] {
        &self.records
    }

    pub fn append(&mut self, record: SyscallRecord) -> Result<()> {
        if self.sealed {
            return Err(HarnessError::LogSealed);
        }
        if record.sequence_number != self.len() {
            return Err(HarnessError::OutOfOrder {
                expected: self.len(),
                got: record.sequence_number,
            });
        }
        self.records.push(record);
        Ok(())
    }

    /// Records are only addressable once the log is sealed.
    pub fn lookup(&self, sequence_number: u64) -> Result<&SyscallRecord> {
        if !self.sealed || sequence_number >= self.len() {
            return Err(HarnessError::RecordNotFound {
                sequence_number,
                len: self.len(),
            });
        }
        Ok(&self.records[sequence_number as usize])
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_header(self.session_id, self.arch, &mut out);
        for r in &self.records {
            encode_entry(r, &mut out);
        }
        if self.sealed {
            encode_trailer(self.len(), &mut out);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<RecordingLog> {
        let mut reader = ByteReader::new(bytes);
        if reader.take(LOG_MAGIC.len())? != LOG_MAGIC {
            return Err(format_error("bad magic"));
        }
        let version = reader.u32()?;
        if version != LOG_FORMAT_VERSION {
            return Err(format_error(&format!(
                "unsupported format version {}",
                version
            )));
        }
        let arch_byte = reader.u8()?;
        let arch = SupportedArch::from_u8(arch_byte)
            .ok_or_else(|| format_error(&format!("unknown arch byte {}", arch_byte)))?;
        let session_id = SessionId::from_raw(reader.u64()?);
        let mut log = RecordingLog::with_session_id(session_id, arch);

        while !reader.is_at_end() {
            let start = reader.pos;
            match reader.u8()? {
                ENTRY_TAG => {
                    let record = decode_entry_body(&mut reader, arch)?;
                    check_crc(&mut reader, start)?;
                    log.append(record).map_err(|e| format_error(&e.to_string()))?;
                }
                TRAILER_TAG => {
                    let count = reader.u64()?;
                    check_crc(&mut reader, start)?;
                    if count != log.len() {
                        return Err(format_error(&format!(
                            "trailer claims {} records, found {}",
                            count,
                            log.len()
                        )));
                    }
                    if !reader.is_at_end() {
                        return Err(format_error("bytes after seal trailer"));
                    }
                    log.seal();
                }
                tag => return Err(format_error(&format!("unknown tag {:#x}", tag))),
            }
        }

        Ok(log)
    }
}

pub fn encode_header(session_id: SessionId, arch: SupportedArch, out: &mut Vec<u8>) {
    out.extend_from_slice(LOG_MAGIC);
    out.extend_from_slice(&LOG_FORMAT_VERSION.to_le_bytes());
    out.push(arch.as_u8());
    out.extend_from_slice(&session_id.as_u64().to_le_bytes());
}

pub fn encode_entry(record: &SyscallRecord, out: &mut Vec<u8>) {
    let start = out.len();
    out.push(ENTRY_TAG);
    out.extend_from_slice(&record.syscall_id.to_le_bytes());
    out.extend_from_slice(&record.sequence_number.to_le_bytes());
    out.push(record.arguments.len() as u8);
    for a in &record.arguments {
        out.extend_from_slice(&a.to_le_bytes());
    }
    out.extend_from_slice(&record.result_code.to_le_bytes());
    match &record.captured_output {
        Some(bytes) => {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        None => out.extend_from_slice(&NO_PAYLOAD.to_le_bytes()),
    }
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
}

pub fn encode_trailer(count: u64, out: &mut Vec<u8>) {
    let start = out.len();
    out.push(TRAILER_TAG);
    out.extend_from_slice(&count.to_le_bytes());
    let crc = crc32fast::hash(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
}

fn decode_entry_body(reader: &mut ByteReader, arch: SupportedArch) -> Result<SyscallRecord> {
    let syscall_id = reader.i32()?;
    let sequence_number = reader.u64()?;
    let nargs = reader.u8()?;
    let desc = classify(arch, syscall_id).map_err(|e| format_error(&e.to_string()))?;
    if nargs as usize != desc.nargs() {
        return Err(format_error(&format!(
            "record {} has {} arguments, `{}' takes {}",
            sequence_number,
            nargs,
            desc.name,
            desc.nargs()
        )));
    }
    let mut arguments = Vec::with_capacity(nargs as usize);
    for _ in 0..nargs {
        arguments.push(reader.u64()?);
    }
    let result_code = reader.i64()?;
    let captured_output = match reader.u32()? {
        NO_PAYLOAD => None,
        len => Some(reader.take(len as usize)?.to_vec()),
    };
    Ok(SyscallRecord {
        syscall_id,
        arguments,
        captured_output,
        result_code,
        sequence_number,
    })
}

fn check_crc(reader: &mut ByteReader, start: usize) -> Result<()> {
    let end = reader.pos;
    let expected = reader.u32()?;
    let actual = crc32fast::hash(&reader.bytes[start..end]);
    if expected != actual {
        return Err(format_error(&format!(
            "checksum mismatch at offset {}: stored {:#010x}, computed {:#010x}",
            start, expected, actual
        )));
    }
    Ok(())
}

fn format_error(msg: &str) -> HarnessError {
    HarnessError::TraceFormat(msg.to_owned())
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> ByteReader<'a> {
        ByteReader { bytes, pos: 0 }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                format_error(&format!("truncated at offset {} (wanted {} bytes)", self.pos, n))
            })?;
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let s = self.take(N)?;
        s.try_into()
            .map_err(|_| format_error("short read"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_abi::{x64, ARCH_GET_FS};

    fn record(seq: u64, id: i32, args: &[u64], result: i64, out: Option<&[u8]>) -> SyscallRecord {
        SyscallRecord {
            syscall_id: id,
            arguments: args.to_vec(),
            captured_output: out.map(|o| o.to_vec()),
            result_code: result,
            sequence_number: seq,
        }
    }

    fn sample_log() -> RecordingLog {
        let mut log = RecordingLog::with_session_id(SessionId::from_raw(0xfeed), SupportedArch::X64);
        log.append(record(
            0,
            x64::ARCH_PRCTL,
            &[ARCH_GET_FS, 0x7ffd_e000],
            0,
            Some(&0x7fff_f7d8_a740u64.to_le_bytes()),
        ))
        .unwrap();
        log.append(record(1, x64::WRITE, &[1, 0x4000, 13], 13, Some(b"EXIT-SUCCESS\n")))
            .unwrap();
        log.append(record(2, x64::EXIT_GROUP, &[0], 0, None)).unwrap();
        log
    }

    #[test]
    fn append_enforces_order() {
        let mut log = RecordingLog::new(SupportedArch::X64);
        match log.append(record(1, x64::EXIT, &[0], 0, None)) {
            Err(HarnessError::OutOfOrder { expected, got }) => {
                assert_eq!(expected, 0);
                assert_eq!(got, 1);
            }
            _ => panic!("expected OutOfOrder"),
        }
        log.append(record(0, x64::EXIT, &[0], 0, None)).unwrap();
        assert_eq!(log.next_sequence_number(), 1);
    }

    #[test]
    fn sealed_log_rejects_appends() {
        let mut log = sample_log();
        log.seal();
        log.seal();
        assert!(log.is_sealed());
        assert!(matches!(
            log.append(record(3, x64::EXIT, &[0], 0, None)),
            Err(HarnessError::LogSealed)
        ));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn lookup_needs_seal_and_bounds() {
        let mut log = sample_log();
        assert!(matches!(
            log.lookup(0),
            Err(HarnessError::RecordNotFound { sequence_number: 0, len: 3 })
        ));
        log.seal();
        assert_eq!(log.lookup(1).unwrap().syscall_id, x64::WRITE);
        assert!(matches!(
            log.lookup(3),
            Err(HarnessError::RecordNotFound { sequence_number: 3, len: 3 })
        ));
    }

    #[test]
    fn encoding_round_trips() {
        let mut log = sample_log();
        log.seal();
        let decoded = RecordingLog::decode(&log.encode()).unwrap();
        assert_eq!(decoded, log);
        assert_eq!(decoded.session_id().as_u64(), 0xfeed);
        assert!(decoded.lookup(2).unwrap().captured_output.is_none());
        assert_eq!(
            decoded.lookup(1).unwrap().captured_output.as_deref(),
            Some(&b"EXIT-SUCCESS\n"[..])
        );
    }

    #[test]
    fn missing_trailer_decodes_unsealed() {
        let log = sample_log();
        let decoded = RecordingLog::decode(&log.encode()).unwrap();
        assert!(!decoded.is_sealed());
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.records(), log.records());
    }

    #[test]
    fn corruption_is_rejected() {
        let mut log = sample_log();
        log.seal();
        let bytes = log.encode();

        // Flip one bit inside the first entry's result code.
        let mut flipped = bytes.clone();
        let header_len = 8 + 4 + 1 + 8;
        flipped[header_len + 1 + 4 + 8 + 1 + 16] ^= 1;
        assert!(matches!(
            RecordingLog::decode(&flipped),
            Err(HarnessError::TraceFormat(_))
        ));

        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            RecordingLog::decode(truncated),
            Err(HarnessError::TraceFormat(_))
        ));

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            RecordingLog::decode(&bad_magic),
            Err(HarnessError::TraceFormat(_))
        ));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let mut log = RecordingLog::with_session_id(SessionId::from_raw(1), SupportedArch::X64);
        log.append(record(0, x64::ARCH_PRCTL, &[ARCH_GET_FS], 0, None))
            .unwrap();
        log.seal();
        match RecordingLog::decode(&log.encode()) {
            Err(HarnessError::TraceFormat(msg)) => assert!(msg.contains("arch_prctl"), "{}", msg),
            other => panic!("expected TraceFormat, got {:?}", other),
        }

        let mut log = RecordingLog::with_session_id(SessionId::from_raw(1), SupportedArch::X64);
        log.append(record(0, 13, &[], 0, None)).unwrap();
        assert!(matches!(
            RecordingLog::decode(&log.encode()),
            Err(HarnessError::TraceFormat(_))
        ));
    }

    #[test]
    fn empty_sealed_log() {
        let mut log = RecordingLog::new(SupportedArch::X86);
        log.seal();
        let decoded = RecordingLog::decode(&log.encode()).unwrap();
        assert!(decoded.is_sealed());
        assert!(decoded.is_empty());
        assert_eq!(decoded.arch(), SupportedArch::X86);
    }
}
