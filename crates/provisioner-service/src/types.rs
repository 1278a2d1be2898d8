use std::fmt;

/// Identifies a cacheable artifact: a file name and the SHA-256 checksum its
/// bytes must hash to.
///
/// The checksum doubles as the name of the cache subdirectory the artifact is
/// stored in, which makes the cache content-addressed: two artifacts with the
/// same file name but different contents never collide on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactDescriptor {
    file_name: String,
    checksum: String,
}

impl ArtifactDescriptor {
    /// Creates a new descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the file name is empty or contains path separators, or if the
    /// checksum is empty or not hexadecimal. Both fields end up as path
    /// segments under the shared cache root, so a malformed descriptor is a
    /// programmer error rather than a recoverable condition.
    pub fn new(file_name: impl Into<String>, checksum: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let checksum = checksum.into();

        assert!(!file_name.is_empty(), "artifact file name must not be empty");
        assert!(
            !file_name.contains(['/', '\\']) && file_name != "." && file_name != "..",
            "artifact file name must be a plain file name, got `{file_name}`"
        );
        assert!(!checksum.is_empty(), "artifact checksum must not be empty");
        assert!(
            checksum.bytes().all(|b| b.is_ascii_hexdigit()),
            "artifact checksum must be a hex digest, got `{checksum}`"
        );

        Self {
            file_name,
            checksum,
        }
    }

    /// The name under which the artifact is stored, not a full path.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The hex SHA-256 digest the artifact's bytes must match.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.checksum, self.file_name)
    }
}
