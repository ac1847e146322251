use std::fmt;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Url;

use crate::error::{Result, UpdaterError};
use crate::fetcher::HttpTransport;
use crate::source::ReleaseChannel;

const SIGN_IN_PATH: &str = "users/sign_in.xml";
const ACCOUNT_PATH: &str = "users/account.xml";
const PLEX_PASS_FEATURE: &str = "pass";

/// plex.tv account credentials used to obtain a token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name or email.
    pub username: String,
    /// Account password.
    pub password: String,
    /// Value of `X-Plex-Client-Identifier`.
    pub client_identifier: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_identifier", &self.client_identifier)
            .finish()
    }
}

/// The signed-in account as reported by plex.tv.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlexAccount {
    /// Authentication token for later requests.
    pub token: String,
    /// Whether the account has an active Plex Pass subscription.
    pub plex_pass: bool,
}

/// Channel and token the feed lookup runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedAccess {
    /// Channel actually requested.
    pub channel: ReleaseChannel,
    /// Token sent with the request, if any.
    pub token: Option<String>,
}

/// Signs in to plex.tv and checks the account's subscription.
#[derive(Clone)]
pub struct AccountClient {
    transport: Arc<dyn HttpTransport>,
    api_root: Url,
}

impl AccountClient {
    /// Client for the plex.tv API rooted at `api_root`.
    pub fn new(transport: Arc<dyn HttpTransport>, mut api_root: Url) -> Self {
        if !api_root.path().ends_with('/') {
            let path = format!("{}/", api_root.path());
            api_root.set_path(&path);
        }
        Self {
            transport,
            api_root,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_root
            .join(path)
            .map_err(|err| UpdaterError::config(format!("invalid plex_api_url: {err}")))
    }

    /// Exchange `credentials` for a token.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<PlexAccount> {
        let url = self.endpoint(SIGN_IN_PATH)?;
        tracing::debug!(%url, username = %credentials.username, "signing in to plex.tv");
        let body = self
            .transport
            .sign_in(&url, credentials)
            .await
            .map_err(UpdaterError::account)?;

        let document = parse_account(&body)?;
        let token = document.token.ok_or_else(|| {
            UpdaterError::AuthenticationFailed("sign-in response carried no token".into())
        })?;
        Ok(PlexAccount {
            token,
            plex_pass: document.plex_pass,
        })
    }

    /// Look up the account that owns `token`.
    pub async fn account(&self, token: &str) -> Result<PlexAccount> {
        let url = self.endpoint(ACCOUNT_PATH)?;
        let body = self
            .transport
            .fetch_bytes(&url, Some(token))
            .await
            .map_err(UpdaterError::account)?;

        let document = parse_account(&body)?;
        Ok(PlexAccount {
            token: document.token.unwrap_or_else(|| token.to_string()),
            plex_pass: document.plex_pass,
        })
    }

    /// Decide which channel and token the feed lookup uses.
    ///
    /// Credentials take precedence over a configured token. The beta channel
    /// is only used for an account with Plex Pass; otherwise the run falls
    /// back to the public feed with a warning.
    pub async fn resolve(
        &self,
        channel: ReleaseChannel,
        credentials: Option<&Credentials>,
        token: Option<&str>,
    ) -> Result<FeedAccess> {
        let account = match (credentials, token) {
            (Some(credentials), _) => Some(self.sign_in(credentials).await?),
            (None, Some(token)) if channel == ReleaseChannel::Beta => {
                Some(self.account(token).await?)
            }
            _ => None,
        };

        let channel = match (channel, &account) {
            (ReleaseChannel::Public, _) => ReleaseChannel::Public,
            (ReleaseChannel::Beta, Some(account)) if account.plex_pass => ReleaseChannel::Beta,
            (ReleaseChannel::Beta, Some(_)) => {
                tracing::warn!(
                    "the account has no active Plex Pass subscription; using the public release feed"
                );
                ReleaseChannel::Public
            }
            (ReleaseChannel::Beta, None) => {
                tracing::warn!(
                    "beta channel requires a Plex Pass account; using the public release feed"
                );
                ReleaseChannel::Public
            }
        };

        Ok(FeedAccess {
            channel,
            token: account
                .map(|account| account.token)
                .or_else(|| token.map(str::to_string)),
        })
    }
}

#[derive(Debug, Default)]
struct AccountDocument {
    token: Option<String>,
    plex_pass: bool,
}

/// Read the `<user>` document returned by sign-in and account lookups.
///
/// Plex Pass means a `<subscription>` child of `<user>` that is not
/// `active="0"` and lists `<feature id="pass"/>`.
fn parse_account(body: &[u8]) -> Result<AccountDocument> {
    let malformed =
        |err: quick_xml::Error| UpdaterError::RemoteUnavailable(format!("malformed plex.tv account response: {err}"));

    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);

    let mut document = AccountDocument::default();
    let mut seen_user = false;
    let mut depth = 0usize;
    let mut subscription: Option<usize> = None;
    let mut active = false;
    let mut has_pass = false;

    loop {
        let (element, level, opened) = match reader.read_event().map_err(malformed)? {
            Event::Start(element) => {
                depth += 1;
                (element, depth, true)
            }
            Event::Empty(element) => (element, depth + 1, false),
            Event::End(_) => {
                if subscription == Some(depth) {
                    subscription = None;
                }
                depth = depth.saturating_sub(1);
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };

        match (level, element.local_name().as_ref()) {
            (1, b"user") => {
                seen_user = true;
                document.token = attribute(&element, "authenticationToken")
                    .map_err(malformed)?
                    .or(attribute(&element, "authToken").map_err(malformed)?);
            }
            (2, b"subscription") => {
                active = attribute(&element, "active").map_err(malformed)?.as_deref() != Some("0");
                if opened {
                    subscription = Some(level);
                }
            }
            (_, b"feature") if subscription == Some(level - 1) => {
                if attribute(&element, "id").map_err(malformed)?.as_deref() == Some(PLEX_PASS_FEATURE) {
                    has_pass = true;
                }
            }
            _ => {}
        }
    }

    if !seen_user {
        return Err(UpdaterError::RemoteUnavailable(
            "plex.tv account response has no <user> element".into(),
        ));
    }
    document.plex_pass = active && has_pass;
    Ok(document)
}

fn attribute(element: &BytesStart<'_>, key: &str) -> std::result::Result<Option<String>, quick_xml::Error> {
    for attr in element.attributes().with_checks(false) {
        let attr = attr?;
        if attr.key.local_name().as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{DownloadSink, FetchError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    const PLEX_PASS_USER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<user email="erin@example.com" username="erin" authenticationToken="tok-123">
  <subscription active="1" status="Active" plan="lifetime">
    <feature id="pass"/>
    <feature id="sync"/>
  </subscription>
  <roles><role id="plexpass"/></roles>
</user>"#;

    #[test]
    fn plex_pass_subscription_is_detected() {
        let document = parse_account(PLEX_PASS_USER.as_bytes()).unwrap();
        assert_eq!(document.token.as_deref(), Some("tok-123"));
        assert!(document.plex_pass);
    }

    #[test]
    fn accounts_without_plex_pass() {
        let cases = [
            r#"<user authenticationToken="t"/>"#,
            r#"<user authenticationToken="t"><subscription active="0"><feature id="pass"/></subscription></user>"#,
            r#"<user authenticationToken="t"><subscription active="1"><feature id="sync"/></subscription></user>"#,
            r#"<user authenticationToken="t"><subscription active="1"/><features><feature id="pass"/></features></user>"#,
        ];
        for body in cases {
            let document = parse_account(body.as_bytes()).unwrap();
            assert_eq!(document.token.as_deref(), Some("t"));
            assert!(!document.plex_pass, "plex pass granted for {body}");
        }
    }

    #[test]
    fn non_account_documents_are_rejected() {
        assert!(matches!(
            parse_account(b"<html><body>maintenance</body></html>"),
            Err(UpdaterError::RemoteUnavailable(_))
        ));
        assert!(parse_account(b"<user><subscription></user>").is_err());
    }

    #[derive(Default)]
    struct AccountTransport {
        body: Vec<u8>,
        reject: bool,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpTransport for AccountTransport {
        async fn fetch_bytes(&self, url: &Url, token: Option<&str>) -> std::result::Result<Vec<u8>, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push(format!("GET {url} {}", token.unwrap_or("-")));
            Ok(self.body.clone())
        }

        async fn sign_in(&self, url: &Url, credentials: &Credentials) -> std::result::Result<Vec<u8>, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push(format!("POST {url} {}", credentials.username));
            if self.reject {
                return Err(FetchError::Status {
                    status: 401,
                    url: url.to_string(),
                });
            }
            Ok(self.body.clone())
        }

        async fn download(&self, _url: &Url, _sink: &mut dyn DownloadSink) -> std::result::Result<u64, FetchError> {
            unreachable!("account lookups never download")
        }
    }

    fn client(transport: &Arc<AccountTransport>) -> AccountClient {
        AccountClient::new(transport.clone(), Url::parse("https://plex.tv").unwrap())
    }

    fn credentials() -> Credentials {
        Credentials {
            username: "erin".into(),
            password: "secret".into(),
            client_identifier: "plex-updater".into(),
        }
    }

    #[tokio::test]
    async fn sign_in_with_plex_pass_keeps_beta() {
        let transport = Arc::new(AccountTransport {
            body: PLEX_PASS_USER.as_bytes().to_vec(),
            ..AccountTransport::default()
        });
        let access = client(&transport)
            .resolve(ReleaseChannel::Beta, Some(&credentials()), None)
            .await
            .unwrap();

        assert_eq!(access.channel, ReleaseChannel::Beta);
        assert_eq!(access.token.as_deref(), Some("tok-123"));
        assert_eq!(
            transport.requests.lock().unwrap().as_slice(),
            ["POST https://plex.tv/users/sign_in.xml erin"]
        );
    }

    #[tokio::test]
    async fn sign_in_without_plex_pass_falls_back_to_public() {
        let transport = Arc::new(AccountTransport {
            body: br#"<user authenticationToken="tok-456"/>"#.to_vec(),
            ..AccountTransport::default()
        });
        let access = client(&transport)
            .resolve(ReleaseChannel::Beta, Some(&credentials()), None)
            .await
            .unwrap();

        assert_eq!(access.channel, ReleaseChannel::Public);
        assert_eq!(access.token.as_deref(), Some("tok-456"));
    }

    #[tokio::test]
    async fn beta_token_is_checked_against_the_account() {
        let transport = Arc::new(AccountTransport {
            body: br#"<user><subscription active="0"/></user>"#.to_vec(),
            ..AccountTransport::default()
        });
        let access = client(&transport)
            .resolve(ReleaseChannel::Beta, None, Some("configured"))
            .await
            .unwrap();

        assert_eq!(access.channel, ReleaseChannel::Public);
        assert_eq!(access.token.as_deref(), Some("configured"));
        assert_eq!(
            transport.requests.lock().unwrap().as_slice(),
            ["GET https://plex.tv/users/account.xml configured"]
        );
    }

    #[tokio::test]
    async fn public_channel_with_token_needs_no_lookup() {
        let transport = Arc::new(AccountTransport::default());
        let access = client(&transport)
            .resolve(ReleaseChannel::Public, None, Some("configured"))
            .await
            .unwrap();

        assert_eq!(access.channel, ReleaseChannel::Public);
        assert_eq!(access.token.as_deref(), Some("configured"));
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_credentials_fail_authentication() {
        let transport = Arc::new(AccountTransport {
            reject: true,
            ..AccountTransport::default()
        });
        let err = client(&transport)
            .resolve(ReleaseChannel::Public, Some(&credentials()), None)
            .await
            .unwrap_err();

        assert!(matches!(err, UpdaterError::AuthenticationFailed(_)));
        assert_eq!(err.exit_code(), 13);
    }

    #[test]
    fn credentials_debug_hides_password() {
        assert!(!format!("{:?}", credentials()).contains("secret"));
    }
}
