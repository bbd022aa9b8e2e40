//! Provider channel handshake.
//!
//! - Each side sends `x25519_pub || nonce || ed25519_pub || sig` where `sig`
//!   signs `x25519_pub || nonce` with the sender's identity key. Signatures are
//!   checked on both sides; the initiator can pin the key it expects, which is
//!   how a download knows it reached the provider it asked for even through a relay.
//! - Derives a 32-byte session key via HKDF-SHA256(shared_secret, nonce_a || nonce_b)
//! - Produces an XChaCha20-Poly1305 AEAD for subsequent encrypted framing.

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use ed25519_dalek::Signature;
use hkdf::Hkdf;
use rand_core::{OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncWrite};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use zeroize::Zeroizing;

use crate::error::{OverlayError, Result};
use crate::keys::Identity;
use crate::wire::{read_frame, write_frame};

/// Fixed lengths
const PUBKEY_LEN: usize = 32;
const NONCE_LEN: usize = 32;
const SIG_LEN: usize = 64;
const HELLO_LEN: usize = PUBKEY_LEN + NONCE_LEN + PUBKEY_LEN + SIG_LEN;
const XNONCE_LEN: usize = 24;

/// Encrypted channel produced by a successful handshake.
pub struct SecureChannel {
    aead: XChaCha20Poly1305,
    peer_key: [u8; 32],
}

struct HandshakeHello {
    x_pub: [u8; PUBKEY_LEN],
    nonce: [u8; NONCE_LEN],
    identity_key: [u8; PUBKEY_LEN],
    sig: [u8; SIG_LEN],
}

impl HandshakeHello {
    fn new(identity: &Identity, x_pub: &X25519Public) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sig = identity.sign(&signed_part(x_pub.as_bytes(), &nonce));
        Self {
            x_pub: *x_pub.as_bytes(),
            nonce,
            identity_key: identity.public_key_bytes(),
            sig: sig.to_bytes(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HELLO_LEN);
        out.extend_from_slice(&self.x_pub);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.identity_key);
        out.extend_from_slice(&self.sig);
        out
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != HELLO_LEN {
            return Err(OverlayError::Handshake(format!(
                "hello must be {HELLO_LEN} bytes, got {}",
                buf.len()
            )));
        }
        let mut hello = Self {
            x_pub: [0u8; PUBKEY_LEN],
            nonce: [0u8; NONCE_LEN],
            identity_key: [0u8; PUBKEY_LEN],
            sig: [0u8; SIG_LEN],
        };
        let (x_pub, rest) = buf.split_at(PUBKEY_LEN);
        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (identity_key, sig) = rest.split_at(PUBKEY_LEN);
        hello.x_pub.copy_from_slice(x_pub);
        hello.nonce.copy_from_slice(nonce);
        hello.identity_key.copy_from_slice(identity_key);
        hello.sig.copy_from_slice(sig);
        Ok(hello)
    }

    fn verify(&self) -> Result<()> {
        let sig = Signature::from_bytes(&self.sig);
        Identity::verify_with_pubkey(
            &self.identity_key,
            &signed_part(&self.x_pub, &self.nonce),
            &sig,
        )
        .map_err(|_| OverlayError::Handshake("peer signature invalid".into()))
    }
}

fn signed_part(x_pub: &[u8; PUBKEY_LEN], nonce: &[u8; NONCE_LEN]) -> Vec<u8> {
    let mut to_sign = Vec::with_capacity(PUBKEY_LEN + NONCE_LEN);
    to_sign.extend_from_slice(x_pub);
    to_sign.extend_from_slice(nonce);
    to_sign
}

fn derive_channel(
    secret: EphemeralSecret,
    peer: &HandshakeHello,
    nonce_a: &[u8; NONCE_LEN],
    nonce_b: &[u8; NONCE_LEN],
) -> Result<SecureChannel> {
    let shared = secret.diffie_hellman(&X25519Public::from(peer.x_pub));

    let info = [&nonce_a[..], &nonce_b[..]].concat();
    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(&info, &mut okm[..])
        .map_err(|_| OverlayError::Handshake("HKDF expand failed".into()))?;

    Ok(SecureChannel {
        aead: XChaCha20Poly1305::new(Key::from_slice(&okm[..])),
        peer_key: peer.identity_key,
    })
}

/// Initiator side. When `expected_peer` is set, the responder must prove
/// ownership of exactly that identity key.
pub async fn initiator_handshake<T>(
    identity: &Identity,
    transport: &mut T,
    expected_peer: Option<&[u8; 32]>,
) -> Result<SecureChannel>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let x_secret = EphemeralSecret::random_from_rng(OsRng);
    let ours = HandshakeHello::new(identity, &X25519Public::from(&x_secret));
    write_frame(transport, &ours.encode()).await?;

    let theirs = HandshakeHello::decode(&read_frame(transport).await?)?;
    theirs.verify()?;
    if let Some(expected) = expected_peer {
        if &theirs.identity_key != expected {
            return Err(OverlayError::Handshake(format!(
                "expected peer {}, reached {}",
                hex::encode(expected),
                hex::encode(theirs.identity_key)
            )));
        }
    }

    derive_channel(x_secret, &theirs, &ours.nonce, &theirs.nonce)
}

/// Responder side. The initiator's identity is authenticated but not restricted.
pub async fn responder_handshake<T>(identity: &Identity, transport: &mut T) -> Result<SecureChannel>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let theirs = HandshakeHello::decode(&read_frame(transport).await?)?;
    theirs.verify()?;

    let x_secret = EphemeralSecret::random_from_rng(OsRng);
    let ours = HandshakeHello::new(identity, &X25519Public::from(&x_secret));
    write_frame(transport, &ours.encode()).await?;

    derive_channel(x_secret, &theirs, &theirs.nonce, &ours.nonce)
}

impl SecureChannel {
    /// Identity key the other side proved during the handshake.
    pub fn peer_key(&self) -> &[u8; 32] {
        &self.peer_key
    }

    /// Send a length-prefixed encrypted frame. Nonce scheme: 24-byte random XNonce per-frame.
    pub async fn send_encrypted_frame<T: AsyncWrite + Unpin + Send>(
        &self,
        transport: &mut T,
        plaintext: &[u8],
    ) -> Result<()> {
        let mut nonce_bytes = [0u8; XNONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let mut buf = plaintext.to_vec();
        self.aead
            .encrypt_in_place(&nonce, b"", &mut buf)
            .map_err(|_| OverlayError::Handshake("aead encrypt failed".into()))?;

        // Frame = nonce || ciphertext
        let mut frame = Vec::with_capacity(XNONCE_LEN + buf.len());
        frame.extend_from_slice(&nonce_bytes);
        frame.extend_from_slice(&buf);
        write_frame(transport, &frame).await?;
        Ok(())
    }

    /// Read an encrypted frame and return plaintext.
    pub async fn read_encrypted_frame<T: AsyncRead + Unpin + Send>(
        &self,
        transport: &mut T,
    ) -> Result<Vec<u8>> {
        let frame = read_frame(transport).await?;
        if frame.len() < XNONCE_LEN {
            return Err(OverlayError::Protocol("encrypted frame too small".into()));
        }

        let (nonce_bytes, cipher) = frame.split_at(XNONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        let mut plain = cipher.to_vec();
        self.aead
            .decrypt_in_place(nonce, b"", &mut plain)
            .map_err(|_| OverlayError::Protocol("aead decrypt failed".into()))?;
        Ok(plain)
    }

    pub async fn send<T, M>(&self, transport: &mut T, msg: &M) -> Result<()>
    where
        T: AsyncWrite + Unpin + Send,
        M: Serialize,
    {
        let bytes = bincode::serialize(msg)?;
        self.send_encrypted_frame(transport, &bytes).await
    }

    pub async fn recv<T, M>(&self, transport: &mut T) -> Result<M>
    where
        T: AsyncRead + Unpin + Send,
        M: DeserializeOwned,
    {
        let bytes = self.read_encrypted_frame(transport).await?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Request;
    use tempfile::TempDir;

    fn identity() -> (TempDir, Identity) {
        let dir = TempDir::new().unwrap();
        let id = Identity::load_or_create(dir.path()).unwrap();
        (dir, id)
    }

    #[tokio::test]
    async fn test_handshake_and_encrypted_roundtrip() {
        let (_da, alice) = identity();
        let (_db, bob) = identity();
        let bob_key = bob.public_key_bytes();
        let alice_key = alice.public_key_bytes();

        let (mut a_io, mut b_io) = tokio::io::duplex(64 * 1024);
        let responder = tokio::spawn(async move {
            let channel = responder_handshake(&bob, &mut b_io).await.unwrap();
            assert_eq!(channel.peer_key(), &alice_key);
            let req: Request = channel.recv(&mut b_io).await.unwrap();
            assert_eq!(req, Request::Browse);
        });

        let channel = initiator_handshake(&alice, &mut a_io, Some(&bob_key))
            .await
            .unwrap();
        channel.send(&mut a_io, &Request::Browse).await.unwrap();
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_each_frame_gets_a_fresh_nonce() {
        let (_da, alice) = identity();
        let (_db, bob) = identity();
        let bob_key = bob.public_key_bytes();

        let (mut a_io, mut b_io) = tokio::io::duplex(64 * 1024);
        let responder = tokio::spawn(async move {
            let channel = responder_handshake(&bob, &mut b_io).await.unwrap();
            let first = read_frame(&mut b_io).await.unwrap();
            let second = read_frame(&mut b_io).await.unwrap();
            (channel, first, second)
        });

        let channel = initiator_handshake(&alice, &mut a_io, Some(&bob_key))
            .await
            .unwrap();
        channel.send_encrypted_frame(&mut a_io, b"same").await.unwrap();
        channel.send_encrypted_frame(&mut a_io, b"same").await.unwrap();

        let (bob_channel, first, second) = responder.await.unwrap();
        assert_eq!(first.len(), second.len());
        assert_ne!(first[..XNONCE_LEN], second[..XNONCE_LEN]);
        assert_ne!(first, second);

        // Either frame still decrypts on its own.
        let mut replay = Vec::new();
        write_frame(&mut replay, &second).await.unwrap();
        let plain = bob_channel
            .read_encrypted_frame(&mut replay.as_slice())
            .await
            .unwrap();
        assert_eq!(plain, b"same");
    }

    #[tokio::test]
    async fn test_initiator_rejects_unexpected_peer() {
        let (_da, alice) = identity();
        let (_db, bob) = identity();
        let (_dc, carol) = identity();
        let carol_key = carol.public_key_bytes();

        let (mut a_io, mut b_io) = tokio::io::duplex(64 * 1024);
        let responder = tokio::spawn(async move {
            let _ = responder_handshake(&bob, &mut b_io).await;
        });

        let err = initiator_handshake(&alice, &mut a_io, Some(&carol_key))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OverlayError::Handshake(_)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_forged_signature_rejected() {
        let (_da, alice) = identity();
        let (_db, mallory) = identity();
        let (mut a_io, mut m_io) = tokio::io::duplex(64 * 1024);

        let forger = tokio::spawn(async move {
            let _ = read_frame(&mut m_io).await.unwrap();
            let x_secret = EphemeralSecret::random_from_rng(OsRng);
            let mut hello = HandshakeHello::new(&mallory, &X25519Public::from(&x_secret));
            hello.sig[0] ^= 0xff;
            write_frame(&mut m_io, &hello.encode()).await.unwrap();
        });

        let err = initiator_handshake(&alice, &mut a_io, None).await.err().unwrap();
        assert!(matches!(err, OverlayError::Handshake(_)));
        forger.await.unwrap();
    }

    #[test]
    fn test_hello_length_checked() {
        assert!(HandshakeHello::decode(&[0u8; HELLO_LEN - 1]).is_err());
    }
}
