// Transaction data structures

use crate::core::{Hash256, hash256, double_sha256, Serializable, SUBSIDY};
use std::io::{Write, Read, Cursor};
use super::serialize::{
    write_varint, read_varint, write_var_bytes, read_var_bytes,
    read_u32, read_u64, write_hash, read_hash,
};

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output
    pub prev_tx_hash: Hash256,
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// signature ‖ public key once signed; free-form data for coinbase
    pub script_sig: Vec<u8>,
}

impl TxInput {
    pub fn new(prev_tx_hash: Hash256, prev_index: u32, script_sig: Vec<u8>) -> Self {
        Self {
            prev_tx_hash,
            prev_index,
            script_sig,
        }
    }

    /// Coinbase input: zero hash at index 0
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            prev_tx_hash: Hash256::zero(),
            prev_index: 0,
            script_sig: data,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_hash.is_zero() && self.prev_index == 0
    }

    fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        write_hash(writer, &self.prev_tx_hash)?;
        writer.write_all(&self.prev_index.to_le_bytes())?;
        write_var_bytes(writer, &self.script_sig)
    }

    fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, String> {
        let prev_tx_hash = read_hash(reader).map_err(|e| e.to_string())?;
        let prev_index = read_u32(reader).map_err(|e| e.to_string())?;
        let script_sig = read_var_bytes(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            prev_tx_hash,
            prev_index,
            script_sig,
        })
    }
}

/// Transaction output - amount and recipient public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in the smallest unit
    pub value: u64,
    /// Recipient's 20-byte public key hash
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(9 + self.script_pubkey.len());
        buf.extend_from_slice(&self.value.to_le_bytes());
        // Vec<u8> writes are infallible
        let _ = write_var_bytes(&mut buf, &self.script_pubkey);
        buf
    }

    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let value = read_u64(reader).map_err(|e| e.to_string())?;
        let script_pubkey = read_var_bytes(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Create a coinbase transaction paying the subsidy to `pubkey_hash`
    pub fn coinbase(data: Vec<u8>, pubkey_hash: Vec<u8>) -> Self {
        Self {
            inputs: vec![TxInput::coinbase(data)],
            outputs: vec![TxOutput::new(SUBSIDY, pubkey_hash)],
            lock_time: 0,
        }
    }

    /// Exactly one coinbase input and exactly one subsidy output
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].is_coinbase()
            && self.outputs.len() == 1
            && self.outputs[0].value == SUBSIDY
    }

    /// Transaction id: identity hash of the canonical bytes
    pub fn txid(&self) -> Hash256 {
        hash256(&Serializable::serialize(self))
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().fold(0u64, |acc, out| acc.saturating_add(out.value))
    }

    /// Copy with every input's script_sig blanked
    pub fn clean_copy(&self) -> Self {
        Self {
            inputs: self
                .inputs
                .iter()
                .map(|input| TxInput::new(input.prev_tx_hash, input.prev_index, Vec::new()))
                .collect(),
            outputs: self.outputs.clone(),
            lock_time: self.lock_time,
        }
    }

    /// Bytes signed for input `index`: the clean copy with that input's
    /// script_sig set to the referenced output's script_pubkey.
    pub fn signing_message(&self, index: usize, script_pubkey: &[u8]) -> Option<Vec<u8>> {
        let mut copy = self.clean_copy();
        copy.inputs.get_mut(index)?.script_sig = script_pubkey.to_vec();
        Some(Serializable::serialize(&copy))
    }

    /// Digest handed to ECDSA for input `index`
    pub fn signature_hash(&self, index: usize, script_pubkey: &[u8]) -> Option<[u8; 32]> {
        self.signing_message(index, script_pubkey)
            .map(|message| double_sha256(&message))
    }

    /// Deserialize from a reader, leaving it positioned after the transaction
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let input_count = read_varint(reader).map_err(|e| e.to_string())?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_varint(reader).map_err(|e| e.to_string())?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        let lock_time = read_u32(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            inputs,
            outputs,
            lock_time,
        })
    }

    pub(crate) fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        write_varint(writer, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.write_to(writer)?;
        }

        write_varint(writer, self.outputs.len() as u64)?;
        for output in &self.outputs {
            writer.write_all(&output.serialize())?;
        }

        writer.write_all(&self.lock_time.to_le_bytes())
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Vec<u8> writes are infallible
        let _ = self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(format!(
                "{} trailing bytes after transaction",
                data.len() - cursor.position() as usize
            ));
        }
        Ok(tx)
    }
}
