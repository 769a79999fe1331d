use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// MD5 and SHA-256 digests of a serialized payload, lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    pub md5: String,
    pub sha256: String,
}

impl Checksums {
    pub fn of(bytes: &[u8]) -> Self {
        let md5 = format!("{:x}", md5::compute(bytes));
        let sha256 = hex::encode(Sha256::digest(bytes));
        Self { md5, sha256 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let empty = Checksums::of(b"");
        assert_eq!(empty.md5, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            empty.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let abc = Checksums::of(b"abc");
        assert_eq!(abc.md5, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            abc.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
