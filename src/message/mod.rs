//! Wire protocol: the message catalog and byte-accurate framing from spec
//! §6. `[typeTag: u16][sourceEdgeIdx: u32][sourceAddr: (ipv4:u32,
//! port:u16)][bandwidthAccum: u64][eventList: varlen][skipPropFlag:
//! u8][monitoredFlag: u8][body...]`. Grounded in
//! `original_source/src/message/` (one struct per message type there; we
//! fold the catalog into one tagged `MessageBody` enum plus the shared
//! `Envelope` header, the way
//! `enterprise::cluster::transport::{Message, Envelope}` folds its own RPC
//! catalog).

use std::net::Ipv4Addr;

use crate::error::{CacheError, CacheResult};
use crate::model::{ByteBuffer, EdgeIdx, Key, Value};

use crate::cooperation::{AcquireOutcome, DirectoryInfo};

/// `Hitflag` (spec §6 message catalog footnote).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitFlag {
    LocalHit,
    CooperativeHit,
    CooperativeInvalid,
    GlobalMiss,
}

impl HitFlag {
    fn tag(self) -> u8 {
        match self {
            HitFlag::LocalHit => 0,
            HitFlag::CooperativeHit => 1,
            HitFlag::CooperativeInvalid => 2,
            HitFlag::GlobalMiss => 3,
        }
    }

    fn from_tag(tag: u8) -> CacheResult<Self> {
        Ok(match tag {
            0 => HitFlag::LocalHit,
            1 => HitFlag::CooperativeHit,
            2 => HitFlag::CooperativeInvalid,
            3 => HitFlag::GlobalMiss,
            other => return Err(CacheError::InvariantViolation(format!("unknown hitflag tag {other}"))),
        })
    }
}

/// Beacon's reply to a directory lookup (spec §6
/// `DirectoryLookupResponse`).
#[derive(Clone, Debug)]
pub enum DirectoryStatus {
    BeingWritten,
    Replica(DirectoryInfo),
    None,
}

/// A minimal wire-serializable mirror of [`AcquireOutcome`] (the original
/// carries a directory-info set; a key-only peer list is enough on the
/// wire since the receiver looks up addresses from its own topology).
#[derive(Clone, Debug)]
pub enum AcquireWritelockStatus {
    Noneed,
    Success(Vec<DirectoryInfo>),
    Failure,
}

impl From<AcquireOutcome> for AcquireWritelockStatus {
    fn from(outcome: AcquireOutcome) -> Self {
        match outcome {
            AcquireOutcome::Noneed => AcquireWritelockStatus::Noneed,
            AcquireOutcome::Success(peers) => AcquireWritelockStatus::Success(peers),
            AcquireOutcome::Failure => AcquireWritelockStatus::Failure,
        }
    }
}

/// The message catalog of spec §6 (non-exhaustive per spec; the
/// cooperation-aware policies don't need additional variants beyond what
/// the base protocol already carries here).
#[derive(Clone, Debug)]
pub enum MessageBody {
    LocalGetRequest { key: Key },
    LocalGetResponse { key: Key, value: Option<Value>, hitflag: HitFlag },
    LocalPutRequest { key: Key, value: Value },
    LocalDelRequest { key: Key },

    GlobalGetRequest { key: Key },
    GlobalGetResponse { key: Key, value: Option<Value> },
    GlobalPutRequest { key: Key, value: Value },
    GlobalPutResponse { key: Key },
    GlobalDelRequest { key: Key },
    GlobalDelResponse { key: Key },

    RedirectedGetRequest { key: Key },
    RedirectedGetResponse { key: Key, value: Option<Value>, hitflag: HitFlag },

    DirectoryLookupRequest { key: Key, source_edge_idx: EdgeIdx },
    DirectoryLookupResponse { key: Key, status: DirectoryStatus },

    DirectoryUpdateRequest { key: Key, is_admit: bool, dirinfo: DirectoryInfo },
    DirectoryUpdateResponse { key: Key },

    AcquireWritelockRequest { key: Key },
    AcquireWritelockResponse { key: Key, status: AcquireWritelockStatus },

    InvalidationRequest { key: Key },
    InvalidationResponse { key: Key },

    ReleaseWritelockRequest { key: Key, sender_dirinfo: DirectoryInfo },
    ReleaseWritelockResponse { key: Key },

    FinishBlockRequest { key: Key },
    FinishBlockResponse { key: Key },
}

impl MessageBody {
    fn type_tag(&self) -> u16 {
        match self {
            MessageBody::LocalGetRequest { .. } => 1,
            MessageBody::LocalGetResponse { .. } => 2,
            MessageBody::LocalPutRequest { .. } => 3,
            MessageBody::LocalDelRequest { .. } => 4,
            MessageBody::GlobalGetRequest { .. } => 5,
            MessageBody::GlobalGetResponse { .. } => 6,
            MessageBody::GlobalPutRequest { .. } => 7,
            MessageBody::GlobalPutResponse { .. } => 8,
            MessageBody::GlobalDelRequest { .. } => 9,
            MessageBody::GlobalDelResponse { .. } => 10,
            MessageBody::RedirectedGetRequest { .. } => 11,
            MessageBody::RedirectedGetResponse { .. } => 12,
            MessageBody::DirectoryLookupRequest { .. } => 13,
            MessageBody::DirectoryLookupResponse { .. } => 14,
            MessageBody::DirectoryUpdateRequest { .. } => 15,
            MessageBody::DirectoryUpdateResponse { .. } => 16,
            MessageBody::AcquireWritelockRequest { .. } => 17,
            MessageBody::AcquireWritelockResponse { .. } => 18,
            MessageBody::InvalidationRequest { .. } => 19,
            MessageBody::InvalidationResponse { .. } => 20,
            MessageBody::ReleaseWritelockRequest { .. } => 21,
            MessageBody::ReleaseWritelockResponse { .. } => 22,
            MessageBody::FinishBlockRequest { .. } => 23,
            MessageBody::FinishBlockResponse { .. } => 24,
        }
    }

    fn put_optional_value(buf: &mut ByteBuffer, value: &Option<Value>) {
        match value {
            Some(v) => {
                buf.put_u8(1);
                buf.put_u8(v.is_deleted() as u8);
                buf.put_bytes(v.as_bytes());
            }
            None => buf.put_u8(0),
        }
    }

    fn get_optional_value(buf: &mut ByteBuffer) -> CacheResult<Option<Value>> {
        Ok(if buf.get_u8()? == 1 {
            let deleted = buf.get_u8()? == 1;
            let bytes = buf.get_bytes()?;
            Some(if deleted { Value::tombstone() } else { Value::new(bytes) })
        } else {
            None
        })
    }

    fn put_dirinfo(buf: &mut ByteBuffer, d: &DirectoryInfo) {
        buf.put_u32(d.target_edge_idx.0);
        buf.put_u32(u32::from(d.beacon_addr.ip));
        buf.put_u16(d.beacon_addr.beacon_port);
        buf.put_u16(d.beacon_addr.cache_port);
    }

    fn get_dirinfo(buf: &mut ByteBuffer) -> CacheResult<DirectoryInfo> {
        let target_edge_idx = EdgeIdx(buf.get_u32()?);
        let ip = Ipv4Addr::from(buf.get_u32()?);
        let beacon_port = buf.get_u16()?;
        let cache_port = buf.get_u16()?;
        Ok(DirectoryInfo {
            target_edge_idx,
            beacon_addr: crate::hashdht::EdgeAddr { ip, beacon_port, cache_port },
        })
    }

    fn encode_body(&self, buf: &mut ByteBuffer) {
        match self {
            MessageBody::LocalGetRequest { key } | MessageBody::LocalDelRequest { key } => {
                buf.put_bytes(key.as_bytes());
            }
            MessageBody::LocalGetResponse { key, value, hitflag } => {
                buf.put_bytes(key.as_bytes());
                Self::put_optional_value(buf, value);
                buf.put_u8(hitflag.tag());
            }
            MessageBody::LocalPutRequest { key, value } => {
                buf.put_bytes(key.as_bytes());
                buf.put_u8(value.is_deleted() as u8);
                buf.put_bytes(value.as_bytes());
            }
            MessageBody::GlobalGetRequest { key }
            | MessageBody::GlobalDelRequest { key }
            | MessageBody::GlobalDelResponse { key }
            | MessageBody::GlobalPutResponse { key }
            | MessageBody::RedirectedGetRequest { key }
            | MessageBody::DirectoryUpdateResponse { key }
            | MessageBody::InvalidationRequest { key }
            | MessageBody::InvalidationResponse { key }
            | MessageBody::ReleaseWritelockResponse { key }
            | MessageBody::FinishBlockRequest { key }
            | MessageBody::FinishBlockResponse { key }
            | MessageBody::AcquireWritelockRequest { key } => {
                buf.put_bytes(key.as_bytes());
            }
            MessageBody::GlobalGetResponse { key, value } => {
                buf.put_bytes(key.as_bytes());
                Self::put_optional_value(buf, value);
            }
            MessageBody::GlobalPutRequest { key, value } => {
                buf.put_bytes(key.as_bytes());
                buf.put_u8(value.is_deleted() as u8);
                buf.put_bytes(value.as_bytes());
            }
            MessageBody::RedirectedGetResponse { key, value, hitflag } => {
                buf.put_bytes(key.as_bytes());
                Self::put_optional_value(buf, value);
                buf.put_u8(hitflag.tag());
            }
            MessageBody::DirectoryLookupRequest { key, source_edge_idx } => {
                buf.put_bytes(key.as_bytes());
                buf.put_u32(source_edge_idx.0);
            }
            MessageBody::DirectoryLookupResponse { key, status } => {
                buf.put_bytes(key.as_bytes());
                match status {
                    DirectoryStatus::BeingWritten => buf.put_u8(0),
                    DirectoryStatus::Replica(d) => {
                        buf.put_u8(1);
                        Self::put_dirinfo(buf, d);
                    }
                    DirectoryStatus::None => buf.put_u8(2),
                }
            }
            MessageBody::DirectoryUpdateRequest { key, is_admit, dirinfo } => {
                buf.put_bytes(key.as_bytes());
                buf.put_u8(*is_admit as u8);
                Self::put_dirinfo(buf, dirinfo);
            }
            MessageBody::AcquireWritelockResponse { key, status } => {
                buf.put_bytes(key.as_bytes());
                match status {
                    AcquireWritelockStatus::Noneed => buf.put_u8(0),
                    AcquireWritelockStatus::Success(peers) => {
                        buf.put_u8(1);
                        buf.put_u32(peers.len() as u32);
                        for d in peers {
                            Self::put_dirinfo(buf, d);
                        }
                    }
                    AcquireWritelockStatus::Failure => buf.put_u8(2),
                }
            }
            MessageBody::ReleaseWritelockRequest { key, sender_dirinfo } => {
                buf.put_bytes(key.as_bytes());
                Self::put_dirinfo(buf, sender_dirinfo);
            }
        }
    }

    fn decode_body(type_tag: u16, buf: &mut ByteBuffer) -> CacheResult<Self> {
        Ok(match type_tag {
            1 => MessageBody::LocalGetRequest { key: Key::new(buf.get_bytes()?) },
            2 => {
                let key = Key::new(buf.get_bytes()?);
                let value = Self::get_optional_value(buf)?;
                let hitflag = HitFlag::from_tag(buf.get_u8()?)?;
                MessageBody::LocalGetResponse { key, value, hitflag }
            }
            3 => {
                let key = Key::new(buf.get_bytes()?);
                let deleted = buf.get_u8()? == 1;
                let bytes = buf.get_bytes()?;
                let value = if deleted { Value::tombstone() } else { Value::new(bytes) };
                MessageBody::LocalPutRequest { key, value }
            }
            4 => MessageBody::LocalDelRequest { key: Key::new(buf.get_bytes()?) },
            5 => MessageBody::GlobalGetRequest { key: Key::new(buf.get_bytes()?) },
            6 => {
                let key = Key::new(buf.get_bytes()?);
                let value = Self::get_optional_value(buf)?;
                MessageBody::GlobalGetResponse { key, value }
            }
            7 => {
                let key = Key::new(buf.get_bytes()?);
                let deleted = buf.get_u8()? == 1;
                let bytes = buf.get_bytes()?;
                let value = if deleted { Value::tombstone() } else { Value::new(bytes) };
                MessageBody::GlobalPutRequest { key, value }
            }
            8 => MessageBody::GlobalPutResponse { key: Key::new(buf.get_bytes()?) },
            9 => MessageBody::GlobalDelRequest { key: Key::new(buf.get_bytes()?) },
            10 => MessageBody::GlobalDelResponse { key: Key::new(buf.get_bytes()?) },
            11 => MessageBody::RedirectedGetRequest { key: Key::new(buf.get_bytes()?) },
            12 => {
                let key = Key::new(buf.get_bytes()?);
                let value = Self::get_optional_value(buf)?;
                let hitflag = HitFlag::from_tag(buf.get_u8()?)?;
                MessageBody::RedirectedGetResponse { key, value, hitflag }
            }
            13 => {
                let key = Key::new(buf.get_bytes()?);
                let source_edge_idx = EdgeIdx(buf.get_u32()?);
                MessageBody::DirectoryLookupRequest { key, source_edge_idx }
            }
            14 => {
                let key = Key::new(buf.get_bytes()?);
                let status = match buf.get_u8()? {
                    0 => DirectoryStatus::BeingWritten,
                    1 => DirectoryStatus::Replica(Self::get_dirinfo(buf)?),
                    2 => DirectoryStatus::None,
                    other => {
                        return Err(CacheError::InvariantViolation(format!(
                            "unknown directory status tag {other}"
                        )))
                    }
                };
                MessageBody::DirectoryLookupResponse { key, status }
            }
            15 => {
                let key = Key::new(buf.get_bytes()?);
                let is_admit = buf.get_u8()? == 1;
                let dirinfo = Self::get_dirinfo(buf)?;
                MessageBody::DirectoryUpdateRequest { key, is_admit, dirinfo }
            }
            16 => MessageBody::DirectoryUpdateResponse { key: Key::new(buf.get_bytes()?) },
            17 => MessageBody::AcquireWritelockRequest { key: Key::new(buf.get_bytes()?) },
            18 => {
                let key = Key::new(buf.get_bytes()?);
                let status = match buf.get_u8()? {
                    0 => AcquireWritelockStatus::Noneed,
                    1 => {
                        let n = buf.get_u32()? as usize;
                        let mut peers = Vec::with_capacity(n);
                        for _ in 0..n {
                            peers.push(Self::get_dirinfo(buf)?);
                        }
                        AcquireWritelockStatus::Success(peers)
                    }
                    2 => AcquireWritelockStatus::Failure,
                    other => {
                        return Err(CacheError::InvariantViolation(format!(
                            "unknown acquire-writelock status tag {other}"
                        )))
                    }
                };
                MessageBody::AcquireWritelockResponse { key, status }
            }
            19 => MessageBody::InvalidationRequest { key: Key::new(buf.get_bytes()?) },
            20 => MessageBody::InvalidationResponse { key: Key::new(buf.get_bytes()?) },
            21 => {
                let key = Key::new(buf.get_bytes()?);
                let sender_dirinfo = Self::get_dirinfo(buf)?;
                MessageBody::ReleaseWritelockRequest { key, sender_dirinfo }
            }
            22 => MessageBody::ReleaseWritelockResponse { key: Key::new(buf.get_bytes()?) },
            23 => MessageBody::FinishBlockRequest { key: Key::new(buf.get_bytes()?) },
            24 => MessageBody::FinishBlockResponse { key: Key::new(buf.get_bytes()?) },
            other => return Err(CacheError::InvariantViolation(format!("unknown message type tag {other}"))),
        })
    }
}

/// One wire event log entry (spec §6 `eventList`); the propagation
/// simulator appends a tag per hop traversed, used by the original for
/// latency accounting replay. Modeled as plain strings rather than a
/// closed enum since the set of hop labels is extensible per policy.
pub type EventList = Vec<String>;

/// The full framed message: header fields plus the catalog body (spec
/// §6's `[typeTag][sourceEdgeIdx][sourceAddr][bandwidthAccum][eventList]
/// [skipPropFlag][monitoredFlag][body...]`).
#[derive(Clone, Debug)]
pub struct Envelope {
    pub source_edge_idx: EdgeIdx,
    pub source_addr: (Ipv4Addr, u16),
    pub bandwidth_accum: u64,
    pub events: EventList,
    pub skip_propagation: bool,
    pub monitored: bool,
    pub body: MessageBody,
}

impl Envelope {
    pub fn new(source_edge_idx: EdgeIdx, source_addr: (Ipv4Addr, u16), body: MessageBody) -> Self {
        Self {
            source_edge_idx,
            source_addr,
            bandwidth_accum: 0,
            events: Vec::new(),
            skip_propagation: false,
            monitored: false,
            body,
        }
    }

    pub fn skip_propagation(mut self) -> Self {
        self.skip_propagation = true;
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.put_u16(self.body.type_tag());
        buf.put_u32(self.source_edge_idx.0);
        buf.put_u32(u32::from(self.source_addr.0));
        buf.put_u16(self.source_addr.1);
        buf.put_u64(self.bandwidth_accum);
        buf.put_u32(self.events.len() as u32);
        for event in &self.events {
            buf.put_bytes(event.as_bytes());
        }
        buf.put_u8(self.skip_propagation as u8);
        buf.put_u8(self.monitored as u8);
        self.body.encode_body(&mut buf);
        buf.into_vec()
    }

    pub fn decode(bytes: Vec<u8>) -> CacheResult<Self> {
        let mut buf = ByteBuffer::wrap(bytes);
        let type_tag = buf.get_u16()?;
        let source_edge_idx = EdgeIdx(buf.get_u32()?);
        let ip = Ipv4Addr::from(buf.get_u32()?);
        let port = buf.get_u16()?;
        let bandwidth_accum = buf.get_u64()?;
        let event_count = buf.get_u32()? as usize;
        let mut events = Vec::with_capacity(event_count);
        for _ in 0..event_count {
            let bytes = buf.get_bytes()?;
            events.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        let skip_propagation = buf.get_u8()? == 1;
        let monitored = buf.get_u8()? == 1;
        let body = MessageBody::decode_body(type_tag, &mut buf)?;
        Ok(Self {
            source_edge_idx,
            source_addr: (ip, port),
            bandwidth_accum,
            events,
            skip_propagation,
            monitored,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(body: MessageBody) {
        let env = Envelope::new(EdgeIdx(3), (Ipv4Addr::new(10, 0, 0, 3), 8003), body.clone());
        let bytes = env.encode();
        let decoded = Envelope::decode(bytes).unwrap();
        assert_eq!(decoded.source_edge_idx, EdgeIdx(3));
        assert_eq!(format!("{:?}", decoded.body), format!("{:?}", body));
    }

    #[test]
    fn local_get_roundtrips() {
        roundtrip(MessageBody::LocalGetRequest { key: Key::from_str("foo") });
        roundtrip(MessageBody::LocalGetResponse {
            key: Key::from_str("foo"),
            value: Some(Value::from("bar")),
            hitflag: HitFlag::CooperativeHit,
        });
    }

    #[test]
    fn directory_lookup_response_roundtrips_every_status() {
        roundtrip(MessageBody::DirectoryLookupResponse {
            key: Key::from_str("k"),
            status: DirectoryStatus::BeingWritten,
        });
        roundtrip(MessageBody::DirectoryLookupResponse {
            key: Key::from_str("k"),
            status: DirectoryStatus::None,
        });
        roundtrip(MessageBody::DirectoryLookupResponse {
            key: Key::from_str("k"),
            status: DirectoryStatus::Replica(DirectoryInfo {
                target_edge_idx: EdgeIdx(2),
                beacon_addr: crate::hashdht::EdgeAddr {
                    ip: Ipv4Addr::new(10, 0, 0, 2),
                    beacon_port: 7002,
                    cache_port: 8002,
                },
            }),
        });
    }

    #[test]
    fn acquire_writelock_response_roundtrips_with_peer_list() {
        let peers = vec![DirectoryInfo {
            target_edge_idx: EdgeIdx(5),
            beacon_addr: crate::hashdht::EdgeAddr {
                ip: Ipv4Addr::new(10, 0, 0, 5),
                beacon_port: 7005,
                cache_port: 8005,
            },
        }];
        roundtrip(MessageBody::AcquireWritelockResponse {
            key: Key::from_str("k"),
            status: AcquireWritelockStatus::Success(peers),
        });
    }

    #[test]
    fn malformed_frame_is_an_error_not_a_panic() {
        let result = Envelope::decode(vec![0, 99]);
        assert!(result.is_err());
    }
}
