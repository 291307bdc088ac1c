//! Synthesis of the dummy certificate that carries a tag.
//!
//! The certificate is a pure ASN.1 container: it is appended to the PKCS#7
//! certificate set but never referenced by any SignerInfo, so Authenticode
//! ignores it entirely. Its validity window is deliberately in the past and
//! its signature algorithm is the historical sha1WithRSAEncryption; both are
//! pinned for compatibility with existing tag consumers.

use std::str::FromStr;

use der::asn1::{Any, BitString, ObjectIdentifier, OctetString, UtcTime};
use der::oid::AssociatedOid;
use der::{DateTime, Decode, Encode};
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::ext::pkix::{BasicConstraints, ExtendedKeyUsage, KeyUsage, KeyUsages};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use x509_cert::time::{Time, Validity};

use crate::error::TagResult;
use crate::pkcs7::TAG_OID;

/// Modulus size of the generated throwaway key.
const RSA_KEY_BITS: usize = 2048;

const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const ANY_EXTENDED_KEY_USAGE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.37.0");

/// Generates a fresh self-signed certificate whose only payload is `tag`,
/// carried raw in a non-critical extension under [`TAG_OID`]. Returns the DER
/// encoding.
pub fn new_dummy_cert(tag: &[u8]) -> TagResult<Vec<u8>> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    let signature_algorithm = AlgorithmIdentifierOwned {
        oid: SHA1_WITH_RSA,
        parameters: Some(Any::from_der(&[0x05, 0x00])?),
    };

    let key_usage = KeyUsage(KeyUsages::KeyCertSign.into());
    let extended_key_usage = ExtendedKeyUsage(vec![ANY_EXTENDED_KEY_USAGE]);
    let basic_constraints = BasicConstraints {
        ca: false,
        path_len_constraint: None,
    };
    let extensions = vec![
        Extension {
            extn_id: KeyUsage::OID,
            critical: true,
            extn_value: OctetString::new(key_usage.to_der()?)?,
        },
        Extension {
            extn_id: ExtendedKeyUsage::OID,
            critical: false,
            extn_value: OctetString::new(extended_key_usage.to_der()?)?,
        },
        Extension {
            extn_id: BasicConstraints::OID,
            critical: true,
            extn_value: OctetString::new(basic_constraints.to_der()?)?,
        },
        // The tag rides as the raw extension value, not wrapped in any inner
        // DER type, so consumers can locate it with a plain byte search.
        Extension {
            extn_id: TAG_OID,
            critical: false,
            extn_value: OctetString::new(tag)?,
        },
    ];

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::from(1u32),
        signature: signature_algorithm.clone(),
        issuer: Name::from_str("CN=Unknown issuer")?,
        validity: Validity {
            not_before: utc(2013, 1, 1)?,
            not_after: utc(2013, 4, 1)?,
        },
        subject: Name::from_str("CN=Dummy certificate")?,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_key(public_key)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: Some(extensions),
    };

    let signing_key = SigningKey::<Sha1>::new(private_key);
    let signature = signing_key.try_sign(&tbs_certificate.to_der()?)?;
    let certificate = Certificate {
        tbs_certificate,
        signature_algorithm,
        signature: BitString::from_bytes(&signature.to_bytes())?,
    };
    Ok(certificate.to_der()?)
}

fn utc(year: u16, month: u8, day: u8) -> der::Result<Time> {
    Ok(Time::UtcTime(UtcTime::from_date_time(DateTime::new(
        year, month, day, 10, 0, 0,
    )?)?))
}
