//! Hand-assembled DER fixtures for unit tests.

/// `1.2.840.113549.1.7.2` (PKCS#7 signedData), pre-encoded.
pub(crate) const OID_PKCS7_SIGNED_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02,
];

/// `1.2.840.113549.1.7.1` (PKCS#7 data), pre-encoded.
pub(crate) const OID_PKCS7_DATA: &[u8] = &[
    0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01,
];

fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        assert!(len <= 0xffff, "fixture too large for a two-byte length");
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

/// One DER element: tag, minimal definite length, content.
pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&der_len(content.len()));
    out.extend_from_slice(content);
    out
}

/// A minimal, valid `SignedData`: version 1, empty digest algorithms, a bare
/// `data` content info, the given raw certificates, empty signer infos.
pub(crate) fn signed_data_der(certs: &[&[u8]]) -> Vec<u8> {
    let mut inner = vec![0x02, 0x01, 0x01]; // version INTEGER 1
    inner.extend_from_slice(&[0x31, 0x00]); // digestAlgorithms SET {}
    inner.extend_from_slice(&tlv(0x30, OID_PKCS7_DATA)); // contentInfo
    inner.extend_from_slice(&tlv(0xa0, &certs.concat())); // certificates
    inner.extend_from_slice(&[0x31, 0x00]); // signerInfos SET {}

    let mut body = OID_PKCS7_SIGNED_DATA.to_vec();
    body.extend_from_slice(&tlv(0xa0, &tlv(0x30, &inner)));
    tlv(0x30, &body)
}

/// A syntactically valid X.509 certificate with no extensions and `pad` bytes
/// of zero public-key material. The signature is garbage; nothing verifies it.
pub(crate) fn filler_cert(pad: usize) -> Vec<u8> {
    let alg_sha1_rsa = tlv(
        0x30,
        &[
            &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x05][..],
            &[0x05, 0x00][..],
        ]
        .concat(),
    );
    let alg_rsa = tlv(
        0x30,
        &[
            &[0x06, 0x09, 0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01][..],
            &[0x05, 0x00][..],
        ]
        .concat(),
    );
    let name = tlv(
        0x30,
        &tlv(
            0x31,
            &tlv(
                0x30,
                &[&tlv(0x06, &[0x55, 0x04, 0x03])[..], &tlv(0x13, b"Filler")[..]].concat(),
            ),
        ),
    );
    let validity = tlv(
        0x30,
        &[
            &tlv(0x17, b"130101100000Z")[..],
            &tlv(0x17, b"130401100000Z")[..],
        ]
        .concat(),
    );
    let mut key_bits = vec![0u8];
    key_bits.extend(std::iter::repeat(0u8).take(pad));
    let spki = tlv(0x30, &[&alg_rsa[..], &tlv(0x03, &key_bits)[..]].concat());

    let tbs = tlv(
        0x30,
        &[
            &[0x02, 0x01, 0x02][..], // serial INTEGER 2
            &alg_sha1_rsa[..],
            &name[..],
            &validity[..],
            &name[..],
            &spki[..],
        ]
        .concat(),
    );
    let signature = tlv(0x03, &[0x00, 0x55, 0x55, 0x55, 0x55]);
    tlv(
        0x30,
        &[&tbs[..], &alg_sha1_rsa[..], &signature[..]].concat(),
    )
}
