//! Wallet record exchanged with the storage collaborator. The core reads and
//! produces it; persistence and its format belong to the caller.

use serde::{Deserialize, Serialize};

use crate::{config::TreeConfig, errors::OtpError, types::Node};

/// Precomputed parent-tree leaves (child subtree roots) for one parent tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedLeaves {
    pub parent_tree_idx: u32,
    pub subtree_roots: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub address: String,
    pub root_hash: Node,
    pub num_leaves: u64,
    pub num_subtree_leaves: u64,
    pub hash_chain_len: u32,
    pub current_parent_tree_idx: u32,
    #[serde(default)]
    pub current_subtree_idx: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_leaves_data: Option<CachedLeaves>,
    pub owner: String,
}

impl WalletRecord {
    /// # Errors
    ///
    /// Returns `OtpError::Config` when the stored shape is invalid.
    pub fn config(&self) -> Result<TreeConfig, OtpError> {
        TreeConfig::new(self.num_leaves, self.num_subtree_leaves, self.hash_chain_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_field_names_are_camel_case() {
        let rec = WalletRecord {
            address: "0xabc".into(),
            root_hash: Node([0x11; 16]),
            num_leaves: 16,
            num_subtree_leaves: 4,
            hash_chain_len: 1,
            current_parent_tree_idx: 2,
            current_subtree_idx: 1,
            cached_leaves_data: None,
            owner: "0xowner".into(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["rootHash"], "11111111111111111111111111111111");
        assert_eq!(json["currentParentTreeIdx"], 2);
        assert!(json.get("cachedLeavesData").is_none());
        let back: WalletRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.config().unwrap().num_subtrees(), 4);
    }

    #[test]
    fn missing_optional_fields_default() {
        let rec: WalletRecord = serde_json::from_str(
            r#"{"address":"a","rootHash":"00000000000000000000000000000000","numLeaves":8,
                "numSubtreeLeaves":8,"hashChainLen":1,"currentParentTreeIdx":0,"owner":"o"}"#,
        )
        .unwrap();
        assert_eq!(rec.current_subtree_idx, 0);
        assert!(rec.cached_leaves_data.is_none());
    }

    #[test]
    fn malformed_root_is_rejected() {
        let bad = r#"{"address":"a","rootHash":"00","numLeaves":8,
                "numSubtreeLeaves":8,"hashChainLen":1,"currentParentTreeIdx":0,"owner":"o"}"#;
        assert!(serde_json::from_str::<WalletRecord>(bad).is_err());
    }
}
