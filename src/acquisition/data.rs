//! Acquisition result record and persistence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use ndarray::{Array4, ArrayD};
use num_complex::Complex64;
use serde::Serialize;
use serde_json::Value;

use crate::acquisition::parameter::AcquisitionParameter;
use crate::Error;

/// Identity of the sequence an acquisition was run with.
#[derive(Clone, Debug)]
pub struct SequenceInfo {
    pub name: String,
    /// Unrolled replay duration in s.
    pub duration: f64,
    /// Raw `.seq` text when the sequence was read from a file.
    pub text: Option<String>,
}

/// Result of one acquisition run.
///
/// `raw` holds one complex array per distinct readout length, shaped
/// `[averages, coils, phase encoding, readout]`; `unprocessed` keeps the
/// mV-scaled, reference-augmented data before demodulation at full rate.
pub struct AcquisitionData {
    raw: Vec<Array4<Complex64>>,
    unprocessed: Vec<Array4<f64>>,
    pub sequence: SequenceInfo,
    pub parameters: AcquisitionParameter,
    /// Dwell time of the decimated raw data in s.
    pub dwell_time: f64,
    /// Session directory acquisitions default to.
    pub session_dir: PathBuf,
    folder_name: String,
    info: serde_json::Map<String, Value>,
    additional: HashMap<String, ArrayD<f64>>,
}

impl AcquisitionData {
    pub(crate) fn new(
        raw: Vec<Array4<Complex64>>,
        unprocessed: Vec<Array4<f64>>,
        sequence: SequenceInfo,
        parameters: AcquisitionParameter,
        dwell_time: f64,
        session_dir: PathBuf,
    ) -> Self {
        let folder_name = format!(
            "{}-{}",
            Local::now().format("%Y-%m-%d-%H%M%S"),
            sequence.name.replace(' ', "_")
        );
        Self {
            raw,
            unprocessed,
            sequence,
            parameters,
            dwell_time,
            session_dir,
            folder_name,
            info: serde_json::Map::new(),
            additional: HashMap::new(),
        }
    }

    /// Raw buckets, one per distinct readout length.
    pub fn raw(&self) -> &[Array4<Complex64>] {
        &self.raw
    }

    /// Raw data of one gate-length bucket.
    pub fn get_data(&self, bucket: usize) -> Option<&Array4<Complex64>> {
        self.raw.get(bucket)
    }

    pub fn unprocessed(&self) -> &[Array4<f64>] {
        &self.unprocessed
    }

    /// Name of the acquisition folder `save` writes into.
    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Merge entries into the free-form info map persisted with the meta data.
    pub fn add_info(&mut self, entries: impl IntoIterator<Item = (String, Value)>) {
        self.info.extend(entries);
    }

    /// Attach a named extra array, persisted as `<name>.bin` beside the raw
    /// data.
    pub fn add_data(&mut self, name: impl Into<String>, array: ArrayD<f64>) {
        self.additional.insert(name.into(), array);
    }

    fn meta(&self) -> Result<Value, Error> {
        let mut meta = serde_json::Map::new();
        meta.insert("version".into(), env!("CARGO_PKG_VERSION").into());
        meta.insert(
            "date_time".into(),
            Local::now().format("%d/%m/%Y, %H:%M:%S").to_string().into(),
        );
        meta.insert("folder_name".into(), self.folder_name.clone().into());
        meta.insert(
            "dimensions".into(),
            serde_json::to_value(
                self.raw.iter().map(|a| a.shape().to_vec()).collect::<Vec<_>>(),
            )?,
        );
        meta.insert("dwell_time".into(), serde_json::to_value(self.dwell_time)?);
        meta.insert(
            "acquisition_parameter".into(),
            serde_json::to_value(&self.parameters)?,
        );
        meta.insert(
            "sequence".into(),
            serde_json::json!({
                "name": self.sequence.name,
                "duration": self.sequence.duration,
            }),
        );
        meta.insert("info".into(), Value::Object(self.info.clone()));
        Ok(Value::Object(meta))
    }

    /// Persist the acquisition.
    ///
    /// Creates `<base>/<YYYY-MM-DD-HHMMSS-SeqName>/` (base is `user_path` or
    /// the session directory) holding `meta.json`, the source `sequence.seq`
    /// when available, `raw_data[_k].bin`, optionally
    /// `unprocessed_data[_k].bin` and any named extra arrays. A folder left
    /// by a previous `save` is only replaced when `overwrite` is set.
    pub fn save(
        &self,
        user_path: Option<&Path>,
        save_unprocessed: bool,
        overwrite: bool,
    ) -> Result<PathBuf, Error> {
        let base = user_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.session_dir.clone());
        let folder = base.join(&self.folder_name);
        if folder.exists() && !overwrite {
            return Err(Error::Config(format!(
                "acquisition folder {} already exists, pass overwrite to replace it",
                folder.display()
            )));
        }
        fs::create_dir_all(&folder)?;

        fs::write(
            folder.join("meta.json"),
            serde_json::to_vec_pretty(&self.meta()?)?,
        )?;

        match &self.sequence.text {
            Some(text) => fs::write(folder.join("sequence.seq"), text)?,
            None => log::warn!(target: "AcqData", "no sequence source text to save"),
        }

        write_buckets(&folder, "raw_data", &self.raw)?;
        if save_unprocessed && !self.unprocessed.is_empty() {
            write_buckets(&folder, "unprocessed_data", &self.unprocessed)?;
        }
        for (name, array) in &self.additional {
            fs::write(folder.join(format!("{name}.bin")), postcard::to_allocvec(array)?)?;
        }

        log::info!(target: "AcqData", "saved acquisition data to {}", folder.display());
        Ok(folder)
    }
}

/// Write one bucket list; a single bucket drops the index suffix.
fn write_buckets<T: Serialize>(folder: &Path, stem: &str, buckets: &[T]) -> Result<(), Error> {
    if buckets.len() == 1 {
        fs::write(folder.join(format!("{stem}.bin")), postcard::to_allocvec(&buckets[0])?)?;
    } else {
        for (k, bucket) in buckets.iter().enumerate() {
            fs::write(
                folder.join(format!("{stem}_{k}.bin")),
                postcard::to_allocvec(bucket)?,
            )?;
        }
    }
    Ok(())
}
