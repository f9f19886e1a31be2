//! Contract ABI parsing and the `topic0 → event` lookup table.
//!
//! Emitted logs carry the Keccak-256 of the event's canonical signature
//! (`Transfer(address,address,uint256)`) as topic 0.

use std::collections::HashMap;

use alloy_json_abi::{Event, EventParam, JsonAbi, Param};
use deputy_types::{bytes_to_hex, DeputyError, Hex, Result};
use serde::Serialize;
use sha3::{Digest, Keccak256};

/// A parsed contract ABI.
#[derive(Debug, Clone, Default)]
pub struct AbiDescriptor {
    abi: JsonAbi,
}

impl AbiDescriptor {
    /// Parse the JSON ABI text returned by the explorer's `getabi` action.
    ///
    /// Alias types (`uint`, `int`, `fixed`, `ufixed`) are rewritten to their
    /// canonical width so event selectors match what the contract emits.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut abi =
            JsonAbi::from_json_str(raw).map_err(|e| DeputyError::InvalidAbi(e.to_string()))?;
        for event in abi.events.values_mut().flatten() {
            for input in &mut event.inputs {
                canonicalize(&mut input.ty, &mut input.components);
            }
        }
        Ok(Self { abi })
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.abi.events()
    }
}

fn canonicalize(ty: &mut String, components: &mut [Param]) {
    let (root, suffix) = ty.split_at(ty.find('[').unwrap_or(ty.len()));
    let canonical = match root {
        "uint" => "uint256",
        "int" => "int256",
        "fixed" => "fixed128x18",
        "ufixed" => "ufixed128x18",
        _ => root,
    };
    if canonical != root {
        *ty = format!("{}{}", canonical, suffix);
    }
    for component in components {
        canonicalize(&mut component.ty, &mut component.components);
    }
}

/// Keccak-256 of `data` as a 0x-prefixed hex string.
pub fn keccak256_hex(data: &[u8]) -> Hex {
    bytes_to_hex(&Keccak256::digest(data))
}

/// Event name and argument layout for one topic 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventDescriptor {
    pub name: String,
    pub signature: String,
    pub topic0: Hex,
    pub inputs: Vec<EventParam>,
}

impl EventDescriptor {
    fn from_event(event: &Event) -> Self {
        Self {
            name: event.name.clone(),
            signature: event.signature(),
            topic0: bytes_to_hex(event.selector().as_slice()),
            inputs: event.inputs.clone(),
        }
    }
}

/// Lookup table from topic 0 to the declared event.
#[derive(Debug, Clone, Default)]
pub struct EventTable {
    by_topic: HashMap<Hex, EventDescriptor>,
}

impl EventTable {
    /// Build the table from every non-anonymous event in `abi`.
    pub fn from_abi(abi: &AbiDescriptor) -> Self {
        let by_topic = abi
            .events()
            .filter(|e| !e.anonymous)
            .map(|e| {
                let descriptor = EventDescriptor::from_event(e);
                (descriptor.topic0.clone(), descriptor)
            })
            .collect();
        Self { by_topic }
    }

    pub fn lookup(&self, topic0: &str) -> Option<&EventDescriptor> {
        self.by_topic.get(&topic0.to_ascii_lowercase())
    }

    pub fn event_name(&self, topic0: &str) -> Option<&str> {
        self.lookup(topic0).map(|d| d.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }

    /// Descriptors ordered by event name.
    pub fn descriptors(&self) -> Vec<&EventDescriptor> {
        let mut all: Vec<_> = self.by_topic.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.signature.cmp(&b.signature)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics_from_vectors() {
        let data = include_str!("../../../tests/vectors/abi.json");
        let vectors: serde_json::Value = serde_json::from_str(data).unwrap();

        let abi_text = serde_json::to_string(&vectors["abi"]).unwrap();
        let abi = AbiDescriptor::from_json(&abi_text).unwrap();
        let table = EventTable::from_abi(&abi);

        let expected = vectors["events"].as_array().unwrap();
        assert_eq!(table.len(), expected.len());

        for v in expected {
            let topic0 = v["topic0"].as_str().unwrap();
            let descriptor = table.lookup(topic0).unwrap_or_else(|| {
                panic!("no event for topic0 {}", topic0);
            });
            assert_eq!(descriptor.name, v["name"].as_str().unwrap());
            assert_eq!(descriptor.signature, v["signature"].as_str().unwrap());
        }
    }

    #[test]
    fn test_topic0_is_keccak_of_signature() {
        let data: serde_json::Value =
            serde_json::from_str(include_str!("../../../tests/vectors/abi.json")).unwrap();
        let abi = AbiDescriptor::from_json(&data["abi"].to_string()).unwrap();
        for descriptor in EventTable::from_abi(&abi).descriptors() {
            assert_eq!(descriptor.topic0, keccak256_hex(descriptor.signature.as_bytes()));
        }
    }

    #[test]
    fn test_lookup_ignores_case() {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Transfer","anonymous":false,"inputs":[
                {"name":"from","type":"address","indexed":true},
                {"name":"to","type":"address","indexed":true},
                {"name":"value","type":"uint256","indexed":false}]}]"#,
        )
        .unwrap();
        let table = EventTable::from_abi(&abi);
        let upper = "0xDDF252AD1BE2C89B69C2B068FC378DAA952BA7F163C4A11628F55A4DF523B3EF";
        assert_eq!(table.event_name(upper), Some("Transfer"));
    }

    #[test]
    fn test_tuple_signature() {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Swap","anonymous":false,"inputs":[
                {"name":"id","type":"bytes32","indexed":true},
                {"name":"legs","type":"tuple[]","indexed":false,"components":[
                    {"name":"asset","type":"address"},
                    {"name":"amount","type":"uint256"}]},
                {"name":"delta","type":"int256[2]","indexed":false}]}]"#,
        )
        .unwrap();
        let table = EventTable::from_abi(&abi);
        let swap = table.descriptors()[0];
        assert_eq!(swap.signature, "Swap(bytes32,(address,uint256)[],int256[2])");
        assert_eq!(swap.inputs.len(), 3);
    }

    #[test]
    fn test_fixed_point_signature() {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Rate","anonymous":false,"inputs":[
                {"name":"rate","type":"ufixed128x18","indexed":false},
                {"name":"delta","type":"fixed64x10[]","indexed":false}]}]"#,
        )
        .unwrap();
        let table = EventTable::from_abi(&abi);
        let rate = table.descriptors()[0];
        assert_eq!(rate.signature, "Rate(ufixed128x18,fixed64x10[])");
        assert_eq!(rate.topic0, keccak256_hex(b"Rate(ufixed128x18,fixed64x10[])"));
    }

    #[test]
    fn test_alias_types_widened() {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"event","name":"Quote","anonymous":false,"inputs":[
                {"name":"price","type":"fixed","indexed":false},
                {"name":"spread","type":"ufixed[2]","indexed":false},
                {"name":"legs","type":"tuple[]","indexed":false,"components":[
                    {"name":"size","type":"uint"},
                    {"name":"skew","type":"int"}]}]}]"#,
        )
        .unwrap();
        let table = EventTable::from_abi(&abi);
        let quote = table.descriptors()[0];
        let canonical = "Quote(fixed128x18,ufixed128x18[2],(uint256,int256)[])";
        assert_eq!(quote.signature, canonical);
        assert_eq!(quote.topic0, keccak256_hex(canonical.as_bytes()));
    }

    #[test]
    fn test_anonymous_and_functions_skipped() {
        let abi = AbiDescriptor::from_json(
            r#"[{"type":"function","name":"transfer","inputs":[],"outputs":[],
                 "stateMutability":"nonpayable"},
                {"type":"event","name":"Hidden","anonymous":true,"inputs":[]}]"#,
        )
        .unwrap();
        assert_eq!(abi.events().count(), 1);
        assert!(EventTable::from_abi(&abi).is_empty());
    }

    #[test]
    fn test_invalid_abi() {
        assert!(matches!(
            AbiDescriptor::from_json("Contract source code not verified"),
            Err(DeputyError::InvalidAbi(_))
        ));
    }
}
