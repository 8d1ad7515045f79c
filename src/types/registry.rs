use super::{Asset, CellDep, Script, H256};
use crate::config::{ScriptTemplate, ScriptsConfig};
use crate::multisig::MultisigScript;

/// Derives every bridge script from the deployed code hashes and the
/// committee's multisig lock.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    sudt_type: ScriptTemplate,
    bridge_lock: ScriptTemplate,
    recipient_type: ScriptTemplate,
    owner_lock: Script,
    cell_deps: Vec<CellDep>,
}

impl ScriptRegistry {
    pub fn new(scripts: &ScriptsConfig, committee: &MultisigScript) -> Self {
        let owner_lock = Script::new(
            scripts.multisig_lock.code_hash,
            scripts.multisig_lock.hash_type,
            committee.lock_args(),
        );
        Self {
            sudt_type: scripts.sudt_type.clone(),
            bridge_lock: scripts.bridge_lock.clone(),
            recipient_type: scripts.recipient_type.clone(),
            owner_lock,
            cell_deps: scripts.cell_deps.clone(),
        }
    }

    /// The committee lock that owns bridge funds on CKB
    pub fn owner_lock(&self) -> &Script {
        &self.owner_lock
    }

    pub fn owner_lock_hash(&self) -> H256 {
        self.owner_lock.hash()
    }

    pub fn bridge_lock_code_hash(&self) -> H256 {
        self.bridge_lock.code_hash
    }

    pub fn bridge_lock(&self, asset: &Asset) -> Script {
        Script::new(
            self.bridge_lock.code_hash,
            self.bridge_lock.hash_type,
            asset.bridge_lock_args(&self.owner_lock_hash()),
        )
    }

    pub fn bridge_lock_hash(&self, asset: &Asset) -> H256 {
        self.bridge_lock(asset).hash()
    }

    /// sUDT type of the wrapped asset, args = bridge lock hash
    pub fn sudt_type(&self, asset: &Asset) -> Script {
        Script::new(
            self.sudt_type.code_hash,
            self.sudt_type.hash_type,
            self.bridge_lock_hash(asset).as_bytes().to_vec(),
        )
    }

    pub fn recipient_type(&self) -> Script {
        Script::new(
            self.recipient_type.code_hash,
            self.recipient_type.hash_type,
            Vec::<u8>::new(),
        )
    }

    pub fn is_recipient_type(&self, script: &Script) -> bool {
        script.code_hash == self.recipient_type.code_hash
    }

    pub fn cell_deps(&self) -> &[CellDep] {
        &self.cell_deps
    }
}
