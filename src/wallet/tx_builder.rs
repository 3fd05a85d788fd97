// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{ChainError, Result};
use crate::storage::{UtxoEntry, UtxoSnapshot};
use crate::wallet::{Address, Keystore};

/// Outputs of `utxos` locked to one of `pubkey_hashes`, ordered by txid then index
pub fn owned_utxos(utxos: &UtxoSnapshot, pubkey_hashes: &[[u8; 20]]) -> Vec<UtxoEntry> {
    let mut owned: Vec<UtxoEntry> = utxos
        .values()
        .flatten()
        .filter(|entry| {
            pubkey_hashes
                .iter()
                .any(|hash| entry.output.script_pubkey == hash.as_slice())
        })
        .cloned()
        .collect();
    owned.sort_by_key(|entry| (entry.txid, entry.index));
    owned
}

/// Sum of the values held by `utxos`
pub fn balance(utxos: &[UtxoEntry]) -> u64 {
    utxos
        .iter()
        .fold(0u64, |acc, entry| acc.saturating_add(entry.output.value))
}

/// Builds signed payments out of a wallet's unspent outputs
pub struct TransactionBuilder<'a> {
    keystore: &'a Keystore,
    utxos: &'a [UtxoEntry],
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(keystore: &'a Keystore, utxos: &'a [UtxoEntry]) -> Self {
        Self { keystore, utxos }
    }

    /// Pay `amount` to `to`, leaving `fee` unclaimed and returning the rest to `change`.
    ///
    /// Outputs are taken in order until `amount + fee` is covered.
    pub fn build(
        &self,
        amount: u64,
        fee: u64,
        to: &Address,
        change: &Address,
    ) -> Result<Transaction> {
        let need = amount.saturating_add(fee);
        let (selected, total) = self.select_utxos(need)?;

        let inputs = selected
            .iter()
            .map(|entry| TxInput::new(entry.txid, entry.index, vec![]))
            .collect();

        let mut outputs = vec![TxOutput::new(amount, to.to_pubkey_hash()?.to_vec())];
        let rest = total - need;
        if rest > 0 {
            outputs.push(TxOutput::new(rest, change.to_pubkey_hash()?.to_vec()));
        }

        let mut tx = Transaction::new(inputs, outputs);
        let owners: Vec<Vec<u8>> = selected
            .iter()
            .map(|entry| entry.output.script_pubkey.clone())
            .collect();
        self.keystore.sign_transaction(&mut tx, &owners)?;

        log::debug!(
            "Built transaction {} spending {} outputs ({} of {})",
            tx.txid(),
            selected.len(),
            need,
            total
        );
        Ok(tx)
    }

    fn select_utxos(&self, target: u64) -> Result<(Vec<&'a UtxoEntry>, u64)> {
        let mut selected = Vec::new();
        let mut total = 0u64;

        for entry in self.utxos {
            if total >= target {
                break;
            }
            selected.push(entry);
            total = total.saturating_add(entry.output.value);
        }

        if total < target {
            return Err(ChainError::InsufficientFunds {
                have: total,
                need: target,
            });
        }
        Ok((selected, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::verify_input_signature;
    use crate::core::Hash256;

    fn funded(keystore: &mut Keystore, values: &[u64]) -> (Address, Vec<UtxoEntry>) {
        let addr = keystore.new_address();
        let script = keystore.get_keypair(&addr).unwrap().pubkey_hash().to_vec();
        let utxos = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                UtxoEntry::new(TxOutput::new(*value, script.clone()), 0, Hash256::new([i as u8 + 1; 32]))
            })
            .collect();
        (addr, utxos)
    }

    #[test]
    fn test_build_with_change() {
        let mut keystore = Keystore::new();
        let (from, utxos) = funded(&mut keystore, &[100_000]);
        let to = Address::from_pubkey_hash(&[9; 20]);

        let tx = TransactionBuilder::new(&keystore, &utxos)
            .build(50_000, 1_000, &to, &from)
            .unwrap();

        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[0].value, 50_000);
        assert_eq!(tx.outputs[0].script_pubkey, vec![9; 20]);
        assert_eq!(tx.outputs[1].value, 49_000);
        assert!(verify_input_signature(&tx, 0, &utxos[0].output.script_pubkey).is_ok());
    }

    #[test]
    fn test_build_exact_amount_has_no_change() {
        let mut keystore = Keystore::new();
        let (from, utxos) = funded(&mut keystore, &[30, 20, 50]);
        let to = Address::from_pubkey_hash(&[9; 20]);

        let tx = TransactionBuilder::new(&keystore, &utxos)
            .build(50, 0, &to, &from)
            .unwrap();

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.outputs.len(), 1);
        for i in 0..2 {
            assert!(verify_input_signature(&tx, i, &utxos[i].output.script_pubkey).is_ok());
        }
    }

    #[test]
    fn test_insufficient_funds() {
        let mut keystore = Keystore::new();
        let (from, utxos) = funded(&mut keystore, &[1_000]);
        let to = Address::from_pubkey_hash(&[9; 20]);

        let result = TransactionBuilder::new(&keystore, &utxos).build(50_000, 1_000, &to, &from);
        match result {
            Err(ChainError::InsufficientFunds { have, need }) => {
                assert_eq!(have, 1_000);
                assert_eq!(need, 51_000);
            }
            other => panic!("unexpected result: {:?}", other.map(|tx| tx.txid())),
        }
    }

    #[test]
    fn test_owned_utxos_and_balance() {
        let mut keystore = Keystore::new();
        let (_, mine) = funded(&mut keystore, &[10, 20]);
        let foreign = UtxoEntry::new(TxOutput::new(99, vec![7; 20]), 0, Hash256::new([50; 32]));

        let mut snapshot = UtxoSnapshot::new();
        for entry in mine.iter().chain(std::iter::once(&foreign)) {
            snapshot.entry(entry.txid).or_default().push(entry.clone());
        }

        let owned = owned_utxos(&snapshot, &keystore.pubkey_hashes());
        assert_eq!(owned, mine);
        assert_eq!(balance(&owned), 30);
    }
}
