//! In-process scripted LDAP server for driving the client end-to-end.

#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;

use ldapmux::asn1::{
    parse_tag, parse_uint, write, ASNTag, Enumerated, Integer, OctetString, Sequence, Set,
    StructureTag, Tag, TagClass, Types,
};
use ldapmux::{Ldap, LdapConnAsync};

pub struct MockDirectory {
    stream: TcpStream,
    buf: Vec<u8>,
}

/// Bind a loopback listener, connect a client through it, and spawn the
/// connection driver. Returns the operation handle and the server side.
pub async fn setup() -> (Ldap, MockDirectory) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ldap://{}", listener.local_addr().expect("local addr"));
    let (client, accepted) = tokio::join!(LdapConnAsync::new(&url), listener.accept());
    let (conn, ldap) = client.expect("connect");
    ldapmux::drive!(conn);
    let (stream, _) = accepted.expect("accept");
    (
        ldap,
        MockDirectory {
            stream,
            buf: Vec::new(),
        },
    )
}

impl MockDirectory {
    /// Read one request envelope, returning its message ID and protocol op.
    pub async fn recv(&mut self) -> (i32, StructureTag) {
        loop {
            match parse_tag(&self.buf[..]) {
                Ok((rest, tag)) => {
                    let consumed = self.buf.len() - rest.len();
                    self.buf.drain(..consumed);
                    return unpack_envelope(tag);
                }
                Err(nom::Err::Incomplete(_)) => {
                    let mut chunk = [0u8; 4096];
                    let n = self.stream.read(&mut chunk).await.expect("server read");
                    assert!(n > 0, "client closed while a PDU was expected");
                    self.buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) => panic!("malformed client PDU: {:?}", e),
            }
        }
    }

    /// Read one request, asserting its application tag, and return the
    /// message ID.
    pub async fn recv_expect(&mut self, app_id: u64) -> i32 {
        let (msgid, protoop) = self.recv().await;
        assert_eq!(protoop.id, app_id, "unexpected protocol op");
        msgid
    }

    pub async fn send(&mut self, pdu: Vec<u8>) {
        self.stream.write_all(&pdu).await.expect("server write");
    }

    /// Deliver a PDU in two chunks split at `at`, with a pause in between.
    pub async fn send_split(&mut self, pdu: Vec<u8>, at: usize) {
        self.stream.write_all(&pdu[..at]).await.expect("server write");
        self.stream.flush().await.expect("server flush");
        time::sleep(Duration::from_millis(20)).await;
        self.stream.write_all(&pdu[at..]).await.expect("server write");
    }

    /// True if the client sends nothing for `dur`. Bytes that do arrive are
    /// kept for a later `recv()`.
    pub async fn quiet(&mut self, dur: Duration) -> bool {
        let mut chunk = [0u8; 4096];
        match time::timeout(dur, self.stream.read(&mut chunk)).await {
            Err(_) => true,
            Ok(Ok(0)) => false,
            Ok(Ok(n)) => {
                self.buf.extend_from_slice(&chunk[..n]);
                false
            }
            Ok(Err(e)) => panic!("server read error: {}", e),
        }
    }

    /// True once the client closes its end of the connection.
    pub async fn eof(&mut self) -> bool {
        let deadline = async {
            let mut chunk = [0u8; 4096];
            loop {
                match self.stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return true,
                    Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                }
            }
        };
        time::timeout(Duration::from_secs(5), deadline)
            .await
            .unwrap_or(false)
    }
}

fn unpack_envelope(tag: StructureTag) -> (i32, StructureTag) {
    let mut tags = tag
        .match_id(Types::Sequence as u64)
        .and_then(|t| t.expect_constructed())
        .expect("request envelope");
    assert!(tags.len() >= 2, "envelope too short");
    let msgid_tag = tags.remove(0);
    let msgid = match parse_uint(
        msgid_tag
            .match_id(Types::Integer as u64)
            .and_then(|t| t.expect_primitive())
            .expect("message id")
            .as_slice(),
    ) {
        Ok((_, id)) => id as i32,
        _ => panic!("failed to parse message id"),
    };
    (msgid, tags.remove(0))
}

/// Wrap a protocol op in an LDAPMessage envelope and serialize it.
pub fn envelope(msgid: i32, protoop: Tag) -> Vec<u8> {
    let msg = Tag::Sequence(Sequence {
        inner: vec![
            Tag::Integer(Integer {
                inner: i64::from(msgid),
                ..Default::default()
            }),
            protoop,
        ],
        ..Default::default()
    })
    .into_structure();
    let mut buf = BytesMut::new();
    write::encode_into(&mut buf, msg).expect("encoded");
    Vec::from(&buf[..])
}

/// An LDAPResult-shaped response under the given application tag.
pub fn result_pdu(msgid: i32, app_id: u64, rc: i64, text: &str) -> Vec<u8> {
    envelope(
        msgid,
        Tag::Sequence(Sequence {
            id: app_id,
            class: TagClass::Application,
            inner: vec![
                Tag::Enumerated(Enumerated {
                    inner: rc,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: Vec::from(text.as_bytes()),
                    ..Default::default()
                }),
            ],
        }),
    )
}

/// A searchResultEntry with string-valued attributes.
pub fn search_entry_pdu(msgid: i32, dn: &str, attrs: &[(&str, &[&str])]) -> Vec<u8> {
    envelope(
        msgid,
        Tag::Sequence(Sequence {
            id: 4,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: Vec::from(dn.as_bytes()),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: attrs
                        .iter()
                        .map(|(name, vals)| {
                            Tag::Sequence(Sequence {
                                inner: vec![
                                    Tag::OctetString(OctetString {
                                        inner: Vec::from(name.as_bytes()),
                                        ..Default::default()
                                    }),
                                    Tag::Set(Set {
                                        inner: vals
                                            .iter()
                                            .map(|v| {
                                                Tag::OctetString(OctetString {
                                                    inner: Vec::from(v.as_bytes()),
                                                    ..Default::default()
                                                })
                                            })
                                            .collect(),
                                        ..Default::default()
                                    }),
                                ],
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        }),
    )
}
