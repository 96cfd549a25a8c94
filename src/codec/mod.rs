//! Serialization pipeline for distributed backends.
//!
//! Payloads travel as `[1 flags byte][payload]`. The flags byte is a bit-set
//! over {Compressed, Xml, Json, Native}. Values are encoded as JSON when JSON
//! can carry them faithfully, falling back to XML otherwise (non-finite
//! floats are the classic case: JSON collapses them to `null`, the XML text
//! form keeps them). The winning format is memoized per concrete type so
//! later values of the same type skip the negotiation.

use std::io::{Read, Write};

use dashmap::DashMap;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::BackendSettings;
use crate::error::CacheFailure;

/// Payload is gzip-compressed.
pub const FLAG_COMPRESSED: u8 = 0x1;
/// Payload is an XML document prefixed with the value's type name.
pub const FLAG_XML: u8 = 0x2;
/// Payload is JSON text.
pub const FLAG_JSON: u8 = 0x4;
/// Payload is raw bytes, stored as-is.
pub const FLAG_NATIVE: u8 = 0x8;

const FORMAT_MASK: u8 = FLAG_XML | FLAG_JSON | FLAG_NATIVE;
const KNOWN_MASK: u8 = FORMAT_MASK | FLAG_COMPRESSED;

/// Values the cache can carry end to end: cloneable for local stores,
/// serde-capable for distributed ones.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Format a type settled on during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Negotiated {
    Json,
    Xml,
}

/// Encode/decode pipeline with optional compression above a size threshold.
///
/// One pipeline instance per distributed backend; the format memo is shared
/// across all regions routed to that backend.
pub struct SerializationPipeline {
    compression: bool,
    threshold: usize,
    formats: DashMap<&'static str, Negotiated>,
}

impl SerializationPipeline {
    pub fn new(compression: bool, threshold: usize) -> Self {
        Self {
            compression,
            threshold,
            formats: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &BackendSettings) -> Self {
        Self::new(settings.compression, settings.compression_threshold)
    }

    /// Encode a value into the wire form.
    pub fn encode<T: CacheValue>(&self, value: &T) -> Result<Vec<u8>, CacheFailure> {
        let tag = std::any::type_name::<T>();

        let (format, payload) = match self.formats.get(tag).map(|f| *f) {
            Some(Negotiated::Json) => (Negotiated::Json, self.encode_json(value)?),
            Some(Negotiated::Xml) => (Negotiated::Xml, self.encode_xml(value)?),
            None => self.negotiate(tag, value)?,
        };

        let flags = match format {
            Negotiated::Json => FLAG_JSON,
            Negotiated::Xml => FLAG_XML,
        };
        Ok(self.frame(flags, payload))
    }

    /// Encode raw bytes under the Native flag, skipping format negotiation.
    pub fn encode_raw(&self, payload: &[u8]) -> Vec<u8> {
        self.frame(FLAG_NATIVE, payload.to_vec())
    }

    /// Decode the wire form back into a value.
    pub fn decode<T: CacheValue>(&self, bytes: &[u8]) -> Result<T, CacheFailure> {
        let (flags, payload) = self.unframe(bytes)?;

        match flags & FORMAT_MASK {
            FLAG_JSON => serde_json::from_slice(&payload).map_err(|e| {
                warn!("failed to decode json payload: {}", e);
                CacheFailure::Deserialization(e.to_string())
            }),
            FLAG_XML => self.decode_xml(&payload),
            FLAG_NATIVE => Err(CacheFailure::Deserialization(
                "native payload requested as a typed value".into(),
            )),
            _ => unreachable!("unframe validated the format bits"),
        }
    }

    /// Decode a Native-flagged payload into its raw bytes.
    pub fn decode_raw(&self, bytes: &[u8]) -> Result<Vec<u8>, CacheFailure> {
        let (flags, payload) = self.unframe(bytes)?;
        if flags & FORMAT_MASK != FLAG_NATIVE {
            return Err(CacheFailure::Deserialization(
                "payload is not a native byte payload".into(),
            ));
        }
        Ok(payload)
    }

    /// First encounter of a type: try JSON, verify it round-trips, fall back
    /// to XML. The winner is memoized so the verification parse runs once per
    /// type, not once per value.
    fn negotiate<T: CacheValue>(
        &self,
        tag: &'static str,
        value: &T,
    ) -> Result<(Negotiated, Vec<u8>), CacheFailure> {
        match self.try_json(value) {
            Ok(payload) => {
                self.formats.insert(tag, Negotiated::Json);
                Ok((Negotiated::Json, payload))
            }
            Err(json_err) => {
                debug!("json encoding rejected for {}: {}", tag, json_err);
                let payload = self.encode_xml(value).map_err(|xml_err| {
                    warn!(
                        "value of type {} not encodable: json: {}; xml: {}",
                        tag, json_err, xml_err
                    );
                    xml_err
                })?;
                self.formats.insert(tag, Negotiated::Xml);
                Ok((Negotiated::Xml, payload))
            }
        }
    }

    fn try_json<T: CacheValue>(&self, value: &T) -> Result<Vec<u8>, String> {
        let payload = serde_json::to_vec(value).map_err(|e| e.to_string())?;
        // serde_json silently degrades some values (non-finite floats become
        // null); a parse-back catches those as well as hard errors.
        serde_json::from_slice::<T>(&payload).map_err(|e| e.to_string())?;
        Ok(payload)
    }

    fn encode_json<T: CacheValue>(&self, value: &T) -> Result<Vec<u8>, CacheFailure> {
        serde_json::to_vec(value).map_err(|e| {
            warn!("failed to encode json payload: {}", e);
            CacheFailure::Serialization(e.to_string())
        })
    }

    /// XML payload: the value's short type name, UTF-8, directly before the
    /// `<` of the root tag.
    fn encode_xml<T: CacheValue>(&self, value: &T) -> Result<Vec<u8>, CacheFailure> {
        let document = quick_xml::se::to_string(value).map_err(|e| {
            warn!("failed to encode xml payload: {}", e);
            CacheFailure::Serialization(e.to_string())
        })?;

        let tag = short_type_name(std::any::type_name::<T>());
        let mut payload = Vec::with_capacity(tag.len() + document.len());
        payload.extend_from_slice(tag.as_bytes());
        payload.extend_from_slice(document.as_bytes());
        Ok(payload)
    }

    fn decode_xml<T: CacheValue>(&self, payload: &[u8]) -> Result<T, CacheFailure> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| CacheFailure::Deserialization(e.to_string()))?;

        // The type-name prefix runs up to the first '<' of the document.
        let start = text.find('<').ok_or_else(|| {
            warn!("xml payload has no document root");
            CacheFailure::Deserialization("xml payload has no document root".into())
        })?;
        let (_type_name, document) = text.split_at(start);

        quick_xml::de::from_str(document).map_err(|e| {
            warn!("failed to decode xml payload: {}", e);
            CacheFailure::Deserialization(e.to_string())
        })
    }

    fn frame(&self, mut flags: u8, mut payload: Vec<u8>) -> Vec<u8> {
        if self.compression && payload.len() > self.threshold {
            match gzip(&payload) {
                Ok(compressed) => {
                    flags |= FLAG_COMPRESSED;
                    payload = compressed;
                }
                Err(e) => {
                    // Ship uncompressed rather than fail the store.
                    warn!("compression failed, storing uncompressed: {}", e);
                }
            }
        }

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(flags);
        framed.extend_from_slice(&payload);
        framed
    }

    fn unframe(&self, bytes: &[u8]) -> Result<(u8, Vec<u8>), CacheFailure> {
        let (&flags, payload) = bytes.split_first().ok_or_else(|| {
            warn!("stored payload is empty");
            CacheFailure::Deserialization("stored payload is empty".into())
        })?;

        // Exactly one format bit and nothing unknown, or the bytes are not
        // ours (or predate a format change).
        let format = flags & FORMAT_MASK;
        if flags & !KNOWN_MASK != 0 || !format.is_power_of_two() {
            warn!("invalid payload flags: {:#04x}", flags);
            return Err(CacheFailure::Deserialization(format!(
                "invalid payload flags: {:#04x}",
                flags
            )));
        }

        let payload = if flags & FLAG_COMPRESSED != 0 {
            gunzip(payload).map_err(|e| {
                warn!("failed to decompress payload: {}", e);
                CacheFailure::Deserialization(e.to_string())
            })?
        } else {
            payload.to_vec()
        };

        Ok((flags, payload))
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut decoded)?;
    Ok(decoded)
}

/// Last path segment of a type name, generics left intact.
fn short_type_name(full: &'static str) -> &'static str {
    let head = &full[..full.find('<').unwrap_or(full.len())];
    let start = head.rfind("::").map(|i| i + 2).unwrap_or(0);
    &full[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Page {
        id: u64,
        title: String,
        tags: Vec<String>,
    }

    fn page() -> Page {
        Page {
            id: 7,
            title: "Start".into(),
            tags: vec!["home".into(), "landing".into()],
        }
    }

    /// Sampled metric whose ratio is NaN when no traffic was seen. JSON
    /// collapses NaN to null, so this type negotiates down to XML.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct HitRatio {
        samples: u32,
        ratio: f64,
    }

    #[test]
    fn json_round_trip() {
        let pipeline = SerializationPipeline::new(false, 0);
        let bytes = pipeline.encode(&page()).unwrap();

        assert_eq!(bytes[0], FLAG_JSON);
        let decoded: Page = pipeline.decode(&bytes).unwrap();
        assert_eq!(decoded, page());
    }

    #[test]
    fn xml_fallback_sets_the_xml_bit_and_round_trips() {
        let pipeline = SerializationPipeline::new(false, 0);
        let value = HitRatio {
            samples: 0,
            ratio: f64::NAN,
        };

        let bytes = pipeline.encode(&value).unwrap();
        assert_eq!(bytes[0], FLAG_XML);

        // Type name prefix sits directly before the document root.
        let text = std::str::from_utf8(&bytes[1..]).unwrap();
        assert!(text.starts_with("HitRatio<"));

        let decoded: HitRatio = pipeline.decode(&bytes).unwrap();
        assert_eq!(decoded.samples, 0);
        assert!(decoded.ratio.is_nan());
    }

    #[test]
    fn negotiation_is_memoized_per_type() {
        let pipeline = SerializationPipeline::new(false, 0);

        let nan = HitRatio {
            samples: 0,
            ratio: f64::NAN,
        };
        assert_eq!(pipeline.encode(&nan).unwrap()[0], FLAG_XML);

        // A later value of the same type that JSON could carry still uses
        // the remembered format.
        let finite = HitRatio {
            samples: 10,
            ratio: 0.5,
        };
        assert_eq!(pipeline.encode(&finite).unwrap()[0], FLAG_XML);
    }

    #[test]
    fn compression_kicks_in_above_the_threshold() {
        let pipeline = SerializationPipeline::new(true, 10);
        let blob: Vec<u8> = (0..200u8).collect();

        let bytes = pipeline.encode_raw(&blob);
        assert_eq!(bytes[0], FLAG_NATIVE | FLAG_COMPRESSED);

        let decoded = pipeline.decode_raw(&bytes).unwrap();
        assert_eq!(decoded, blob);
    }

    #[test]
    fn small_payloads_stay_uncompressed() {
        let pipeline = SerializationPipeline::new(true, 1024);
        let bytes = pipeline.encode(&page()).unwrap();
        assert_eq!(bytes[0], FLAG_JSON);
    }

    #[test]
    fn compression_off_ignores_the_threshold() {
        let pipeline = SerializationPipeline::new(false, 10);
        let blob = vec![0u8; 500];
        let bytes = pipeline.encode_raw(&blob);
        assert_eq!(bytes[0], FLAG_NATIVE);
    }

    #[test]
    fn corrupt_flags_are_a_deserialization_failure() {
        let pipeline = SerializationPipeline::new(false, 0);

        // Unknown high bit.
        let err = pipeline.decode::<Page>(&[0x80, b'{', b'}']).unwrap_err();
        assert!(matches!(err, CacheFailure::Deserialization(_)));

        // Two format bits at once.
        let err = pipeline
            .decode::<Page>(&[FLAG_JSON | FLAG_XML, b'{', b'}'])
            .unwrap_err();
        assert!(matches!(err, CacheFailure::Deserialization(_)));

        // Empty payload.
        let err = pipeline.decode::<Page>(&[]).unwrap_err();
        assert!(matches!(err, CacheFailure::Deserialization(_)));
    }

    #[test]
    fn truncated_json_is_a_deserialization_failure() {
        let pipeline = SerializationPipeline::new(false, 0);
        let mut bytes = pipeline.encode(&page()).unwrap();
        bytes.truncate(bytes.len() / 2);

        let err = pipeline.decode::<Page>(&bytes).unwrap_err();
        assert!(matches!(err, CacheFailure::Deserialization(_)));
    }

    #[test]
    fn native_payload_refuses_typed_decode() {
        let pipeline = SerializationPipeline::new(false, 0);
        let bytes = pipeline.encode_raw(b"raw asset");
        assert!(pipeline.decode::<Page>(&bytes).is_err());
    }

    #[test]
    fn short_type_name_trims_the_path() {
        assert_eq!(short_type_name("crate::codec::tests::Page"), "Page");
        assert_eq!(short_type_name("Page"), "Page");
        assert_eq!(
            short_type_name("alloc::vec::Vec<alloc::string::String>"),
            "Vec<alloc::string::String>"
        );
    }
}
