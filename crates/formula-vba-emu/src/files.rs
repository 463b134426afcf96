use std::collections::{BTreeMap, HashMap};

use crate::value::VbaValue;

/// Files opened, written and closed by emulated code. Nothing touches the real filesystem.
#[derive(Debug, Default)]
pub struct FileTable {
    open: BTreeMap<String, Vec<u8>>,
    ids: HashMap<String, String>,
    closed: BTreeMap<String, Vec<u8>>,
}

pub(crate) fn normalize_file_name(name: &str) -> String {
    name.trim().replace(".\\", "").replace('\\', "/")
}

fn normalize_id(id: &str) -> String {
    id.trim().trim_start_matches('#').trim().to_ascii_lowercase()
}

impl FileTable {
    /// Map a logical id (`#1`, `1`) or a file name to the file name used as key.
    fn resolve(&self, id: &str) -> String {
        match self.ids.get(&normalize_id(id)) {
            Some(name) => name.clone(),
            None => normalize_file_name(id),
        }
    }

    pub fn open(&mut self, name: &str, id: Option<&str>) -> String {
        let name = normalize_file_name(name);
        if let Some(id) = id {
            self.ids.insert(normalize_id(id), name.clone());
        }
        self.open.insert(name.clone(), Vec::new());
        name
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains_key(&self.resolve(id))
    }

    /// Append `data` to the file behind `id`, opening it first if needed.
    pub fn write(&mut self, id: &str, data: &VbaValue) -> String {
        let name = self.resolve(id);
        let buf = self.open.entry(name.clone()).or_insert_with(|| {
            log::info!("writing to file {name:?} that was never opened");
            Vec::new()
        });
        buf.extend(encode_file_data(data));
        name
    }

    /// Close the file behind `id` and return its final contents.
    pub fn close(&mut self, id: &str) -> Option<(String, Vec<u8>)> {
        let name = self.resolve(id);
        let data = self.open.remove(&name)?;
        self.ids.retain(|_, v| *v != name);
        self.closed.insert(name.clone(), data.clone());
        Some((name, data))
    }

    pub fn open_names(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }

    pub fn closed(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.closed
    }
}

/// `&HXX` strings are single bytes, integers are little-endian with trailing zero bytes trimmed.
fn encode_file_data(data: &VbaValue) -> Vec<u8> {
    match data {
        VbaValue::String(s) if s.len() <= 4 && s.to_ascii_lowercase().starts_with("&h") => {
            match u8::from_str_radix(&s[2..], 16) {
                Ok(b) => vec![b],
                Err(_) => data.to_bytes(),
            }
        }
        VbaValue::Integer(v) => {
            let mut bytes = (*v as i32).to_le_bytes().to_vec();
            while bytes.last() == Some(&0) {
                bytes.pop();
            }
            bytes
        }
        other => other.to_bytes(),
    }
}
