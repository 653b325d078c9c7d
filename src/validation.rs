//! Pre-run checks on the reference and floating images.
//!
//! Warnings are logged and the run goes ahead; errors block it. Both are
//! reported as one aggregated message.

use std::fmt;

use tracing::warn;

use crate::error::{RegistrationError, Result};
use crate::image::DATATYPE_FLOAT64;
use crate::io::HeaderInfo;

/// qform codes the registration tools interpret reliably.
pub const VALID_QFORM_CODES: [i16; 3] = [1, 2, 3];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    /// Log the warnings, then fail if anything blocks the run.
    pub fn into_result(self) -> Result<Self> {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        if self.has_errors() {
            Err(RegistrationError::Validation(self))
        } else {
            Ok(self)
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self
            .errors
            .iter()
            .chain(self.warnings.iter())
            .map(String::as_str)
            .collect();
        write!(f, "{}", messages.join("\n\n"))
    }
}

fn grouped(title: &str, lines: &[String]) -> String {
    format!("{}\n\n{}", title, lines.join("\n"))
}

/// Check the inputs of a run.
///
/// Double-precision voxels block the run. The same image used twice and
/// qform codes outside [`VALID_QFORM_CODES`] only warn.
pub fn validate_inputs(same_volume: bool, reference: &HeaderInfo, floating: &HeaderInfo) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut datatype_lines = Vec::new();
    if reference.datatype == DATATYPE_FLOAT64 {
        datatype_lines.push("Reference image does not have a valid data type".to_string());
    }
    if floating.datatype == DATATYPE_FLOAT64 {
        datatype_lines.push("Floating image does not have a valid data type".to_string());
    }
    if !datatype_lines.is_empty() {
        report.error(grouped("Data type not handled yet:", &datatype_lines));
    }

    if same_volume {
        report.warning("Reference and floating images are the same");
    }

    let mut qform_lines = Vec::new();
    if !VALID_QFORM_CODES.contains(&reference.qform_code) {
        qform_lines.push(format!(
            "Reference image does not have a valid qform_code: {}",
            reference.qform_code
        ));
    }
    if !VALID_QFORM_CODES.contains(&floating.qform_code) {
        qform_lines.push(format!(
            "Floating image does not have a valid qform_code: {}",
            floating.qform_code
        ));
    }
    if !qform_lines.is_empty() {
        report.warning(grouped("Registration results might be unexpected:", &qform_lines));
    }

    report
}
