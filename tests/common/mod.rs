use std::{
    collections::HashMap,
    future::{self, Ready},
    io::{self, ErrorKind},
    sync::Arc,
};
use tokio::fs;
use viaauth::{
    crypto::SigningKey,
    encode_base64,
    header::{FieldBody, HeaderField, HeaderFields},
    signer::{SignRequest, Signer, SignerError, SigningResult},
    verifier::{LookupTxt, TxtLocator, VerificationResult, Verifier},
};

/// A DNS resolver answering from a fixed table of TXT records.
#[derive(Clone, Default)]
pub struct MockLookup(Arc<HashMap<String, Vec<String>>>);

impl MockLookup {
    pub fn new<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, String)>,
        S: Into<String>,
    {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, txt) in records {
            map.entry(name.into()).or_default().push(txt);
        }
        Self(Arc::new(map))
    }
}

impl LookupTxt for MockLookup {
    type Answer = Vec<io::Result<Vec<u8>>>;
    type Query<'a> = Ready<io::Result<Self::Answer>>;

    fn lookup_txt(&self, domain: &str) -> Self::Query<'_> {
        future::ready(match self.0.get(domain) {
            Some(txts) => Ok(txts.iter().map(|txt| Ok(txt.clone().into_bytes())).collect()),
            None => Err(ErrorKind::NotFound.into()),
        })
    }
}

pub fn make_locator<I, S>(records: I) -> TxtLocator<MockLookup>
where
    I: IntoIterator<Item = (S, String)>,
    S: Into<String>,
{
    TxtLocator::new(MockLookup::new(records))
}

pub async fn read_signing_key(file_name: &str) -> io::Result<SigningKey> {
    let s = fs::read_to_string(file_name).await?;
    SigningKey::from_pkcs8_pem(&s).map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))
}

pub async fn read_public_key_file_base64(file_name: &str) -> io::Result<String> {
    let s = fs::read_to_string(file_name).await?;
    let mut key_base64: Vec<_> = s.lines().skip(1).collect();
    key_base64.pop();
    Ok(key_base64.join(""))
}

pub async fn rsa_key_record() -> String {
    let base64 = read_public_key_file_base64("tests/keys/rsa2048.pub.pem")
        .await
        .unwrap();
    format!("v=DKIM1; k=rsa; p={base64}")
}

pub fn ed25519_key_record(signing_key: &SigningKey) -> String {
    let SigningKey::Ed25519(k) = signing_key else {
        panic!("not an Ed25519 key");
    };
    let base64 = encode_base64(k.verifying_key().to_bytes());
    format!("v=DKIM1; k=ed25519; p={base64}")
}

pub fn make_header_fields() -> HeaderFields {
    "Received: from submit.example.com by mx.example.com\r\n\
     From: Sender <sender@example.com>\r\n\
     To: Recipient <recipient@example.net>\r\n\
     Subject: Lunch\r\n\
     Date: Mon, 13 Nov 2023 10:00:00 +0000\r\n\
     Message-ID: <1234@example.com>\r\n"
        .parse()
        .unwrap()
}

pub fn make_body() -> Vec<u8> {
    b"Hello,\r\n\r\nare you coming  along for lunch?\r\n\r\n\r\n".to_vec()
}

/// Replaces the value of the topmost header field with the given name.
pub fn replace_header(headers: HeaderFields, name: &str, value: &str) -> HeaderFields {
    let mut fields: Vec<HeaderField> = headers.into();
    let field = fields.iter_mut().find(|(n, _)| *n == name).unwrap();
    field.1 = FieldBody::new(value.as_bytes()).unwrap();
    HeaderFields::new(fields).unwrap()
}

pub fn sign<T, I>(
    headers: &HeaderFields,
    body: &[u8],
    requests: I,
) -> Vec<Result<SigningResult, SignerError>>
where
    T: AsRef<SigningKey>,
    I: IntoIterator<Item = SignRequest<T>>,
{
    let mut signer = Signer::prepare_signing(requests, headers).unwrap();

    let _ = signer.process_body_chunk(body);

    signer.finish(headers)
}

pub async fn verify_all(
    verifier: &Verifier,
    locator: &TxtLocator<MockLookup>,
    headers: &HeaderFields,
    body: &[u8],
) -> Vec<VerificationResult> {
    let mut pending = verifier.verify_header(locator, headers).await.unwrap();

    let _ = pending.process_body_chunk(body);

    pending.finish()
}
