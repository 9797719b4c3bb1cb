use tracing::warn;

use crate::config::normalize_extension;
use crate::{FileDescriptor, RejectReason, UploadRules};

/// Screens file descriptors against an [`UploadRules`] policy.
///
/// The extension check is authoritative. A declared content type outside
/// the expected list is tolerated with a warning, since callers report
/// content types inconsistently.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: UploadRules,
}

impl Validator {
    /// Build a validator. Extension entries are normalized to lowercase ".ext".
    pub fn new(mut rules: UploadRules) -> Self {
        for ext in &mut rules.allowed_extensions {
            *ext = normalize_extension(ext);
        }
        Self { rules }
    }

    pub fn rules(&self) -> &UploadRules {
        &self.rules
    }

    /// Accept or reject a descriptor
    pub fn validate(&self, descriptor: &FileDescriptor) -> Result<(), RejectReason> {
        let allowed = descriptor
            .extension()
            .is_some_and(|ext| self.rules.allowed_extensions.contains(&ext));
        if !allowed {
            return Err(RejectReason::UnsupportedExtension {
                allowed: self.rules.allowed_extensions.clone(),
            });
        }

        if descriptor.size > self.rules.max_file_size_bytes {
            return Err(RejectReason::FileTooLarge {
                max_bytes: self.rules.max_file_size_bytes,
            });
        }

        if !descriptor.content_type.is_empty()
            && !self
                .rules
                .allowed_content_types
                .iter()
                .any(|ct| ct.eq_ignore_ascii_case(&descriptor.content_type))
        {
            warn!(
                file = %descriptor.name,
                content_type = %descriptor.content_type,
                "Unexpected content type, allowing based on extension"
            );
        }

        Ok(())
    }
}
