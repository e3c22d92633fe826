use elliptic_curve::ecdh::diffie_hellman;
use elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey as P256PublicKey, SecretKey as P256SecretKey};
use p384::{PublicKey as P384PublicKey, SecretKey as P384SecretKey};
use p521::{PublicKey as P521PublicKey, SecretKey as P521SecretKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

use crate::message::NamedCurve;
use crate::Error;

/// Ephemeral ECDHE keypair for a named curve.
///
/// Holds the private key in its typed form and the public key in the wire
/// encoding the handshake sends: raw 32 bytes for X25519, uncompressed SEC1
/// point for the NIST curves.
pub struct KeyExchange {
    inner: Inner,
    public_key: Vec<u8>,
}

enum Inner {
    X25519(StaticSecret),
    P256(P256SecretKey),
    P384(P384SecretKey),
    P521(P521SecretKey),
}

impl KeyExchange {
    /// Generate a fresh ephemeral keypair for the given curve.
    ///
    /// Fails with [`Error::UnsupportedCurve`] for any curve other than
    /// X25519, P-256, P-384 or P-521.
    pub fn generate(curve: NamedCurve) -> Result<KeyExchange, Error> {
        match curve {
            NamedCurve::X25519 => {
                let secret = StaticSecret::random_from_rng(OsRng);
                let public_key = X25519PublicKey::from(&secret).as_bytes().to_vec();
                Ok(KeyExchange {
                    inner: Inner::X25519(secret),
                    public_key,
                })
            }
            NamedCurve::Secp256r1 => {
                let secret = P256SecretKey::random(&mut OsRng);
                let public_key = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(KeyExchange {
                    inner: Inner::P256(secret),
                    public_key,
                })
            }
            NamedCurve::Secp384r1 => {
                let secret = P384SecretKey::random(&mut OsRng);
                let public_key = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(KeyExchange {
                    inner: Inner::P384(secret),
                    public_key,
                })
            }
            NamedCurve::Secp521r1 => {
                let secret = P521SecretKey::random(&mut OsRng);
                let public_key = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Ok(KeyExchange {
                    inner: Inner::P521(secret),
                    public_key,
                })
            }
            _ => Err(Error::UnsupportedCurve(curve)),
        }
    }

    pub fn curve(&self) -> NamedCurve {
        match &self.inner {
            Inner::X25519(_) => NamedCurve::X25519,
            Inner::P256(_) => NamedCurve::Secp256r1,
            Inner::P384(_) => NamedCurve::Secp384r1,
            Inner::P521(_) => NamedCurve::Secp521r1,
        }
    }

    /// Public key in wire encoding.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Private key as big-endian scalar bytes (raw 32 bytes for X25519).
    pub fn private_key(&self) -> Vec<u8> {
        match &self.inner {
            Inner::X25519(secret) => secret.to_bytes().to_vec(),
            Inner::P256(secret) => secret.to_bytes().to_vec(),
            Inner::P384(secret) => secret.to_bytes().to_vec(),
            Inner::P521(secret) => secret.to_bytes().to_vec(),
        }
    }

    /// Compute the shared secret against the peer's public key.
    ///
    /// The peer key must be in the same wire encoding as [`public_key`] and
    /// on the same curve. The NIST curve secrets come back at the full field
    /// width, leading zeros included.
    ///
    /// [`public_key`]: KeyExchange::public_key
    pub fn diffie_hellman(&self, peer_public_key: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.inner {
            Inner::X25519(secret) => {
                let bytes: [u8; 32] = peer_public_key
                    .try_into()
                    .map_err(|_| Error::InvalidPublicKey)?;
                let peer = X25519PublicKey::from(bytes);
                Ok(secret.diffie_hellman(&peer).as_bytes().to_vec())
            }
            Inner::P256(secret) => {
                let peer = P256PublicKey::from_sec1_bytes(peer_public_key)
                    .map_err(|_| Error::InvalidPublicKey)?;
                let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            Inner::P384(secret) => {
                let peer = P384PublicKey::from_sec1_bytes(peer_public_key)
                    .map_err(|_| Error::InvalidPublicKey)?;
                let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
            Inner::P521(secret) => {
                let peer = P521PublicKey::from_sec1_bytes(peer_public_key)
                    .map_err(|_| Error::InvalidPublicKey)?;
                let shared = diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
                Ok(shared.raw_secret_bytes().to_vec())
            }
        }
    }
}
