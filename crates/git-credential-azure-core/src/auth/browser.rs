use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use url::Url;

use super::pkce::{random_state, PkcePair};
use super::{AuthError, AuthResult, IdentityClient};

const SUCCESS_HTML: &str = r#"<html><body><h1>Authentication complete</h1><p>You may close this window and return to git.</p></body></html>"#;
const ERROR_HTML: &str = r#"<html><body><h1>Authentication failed</h1><p>Please return to the terminal for details.</p></body></html>"#;
const NOT_FOUND_HTML: &str = r#"<html><body><h1>Not found</h1></body></html>"#;
/// Upper bound on the bytes read from a single redirect request.
const MAX_REQUEST_BYTES: u64 = 16 * 1024;

/// Run the interactive sign-in through the system browser and a loopback redirect.
///
/// `notify_authorization_url` is called only when the browser is not opened
/// automatically, so the user can open the URL by hand.
pub async fn run_loopback_flow<F>(
    client: &IdentityClient,
    login_hint: Option<&str>,
    open_browser: bool,
    notify_authorization_url: F,
) -> Result<AuthResult, AuthError>
where
    F: Fn(&Url) -> Result<(), AuthError>,
{
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    let redirect_uri = Url::parse(&format!("http://localhost:{port}"))?;
    let pkce = PkcePair::generate();
    let state = random_state();
    let auth_url = client.authorization_url(&pkce, &state, &redirect_uri, login_hint);
    tracing::debug!(%redirect_uri, "waiting for authorization redirect");

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = accept_authorization(listener, state).await;
        let _ = tx.send(result);
    });

    let launched = if open_browser {
        match open::that(auth_url.as_str()) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("{}", AuthError::BrowserLaunch(err.to_string()));
                false
            }
        }
    } else {
        false
    };
    if !launched {
        notify_authorization_url(&auth_url)?;
    }

    let code = rx.await.map_err(|_| AuthError::ListenerClosed)??;
    client.exchange_code(&code, &pkce, &redirect_uri).await
}

async fn accept_authorization(
    listener: TcpListener,
    expected_state: String,
) -> Result<String, AuthError> {
    loop {
        let (stream, _addr) = listener.accept().await?;
        let mut reader = BufReader::new(stream);
        let url = match read_request_url(&mut reader).await {
            Ok(url) => url,
            Err(err) => {
                tracing::debug!("ignoring loopback connection: {err}");
                continue;
            }
        };
        let stream = reader.get_mut();

        let mut code: Option<String> = None;
        let mut state: Option<String> = None;
        let mut error: Option<String> = None;
        let mut description: Option<String> = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        // Browsers ask for favicons and the like before or after the redirect.
        if code.is_none() && error.is_none() {
            respond(stream, 404, NOT_FOUND_HTML).await;
            continue;
        }

        if state.as_deref() != Some(expected_state.as_str()) {
            respond(stream, 400, ERROR_HTML).await;
            return Err(AuthError::StateMismatch);
        }

        if let Some(err) = error {
            respond(stream, 400, ERROR_HTML).await;
            let reason = match description {
                Some(description) => format!("{err}: {description}"),
                None => err,
            };
            return Err(AuthError::AccessDenied(reason));
        }

        let code = code.ok_or(AuthError::MissingAuthorizationCode)?;
        respond(stream, 200, SUCCESS_HTML).await;
        let _ = stream.shutdown().await;
        return Ok(code);
    }
}

/// Read the request line (and skip the headers) of one loopback request.
async fn read_request_url(reader: &mut BufReader<TcpStream>) -> Result<Url, AuthError> {
    let mut limited = (&mut *reader).take(MAX_REQUEST_BYTES);
    let mut request_line = String::new();
    limited.read_line(&mut request_line).await?;
    let path = parse_request_path(&request_line)?;
    let url = Url::parse(&format!("http://localhost{path}"))?;

    let mut header = String::new();
    loop {
        header.clear();
        if limited.read_line(&mut header).await? == 0 || header.trim_end().is_empty() {
            break;
        }
    }
    Ok(url)
}

fn parse_request_path(request: &str) -> Result<&str, AuthError> {
    let first_line = request
        .lines()
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing request line".into()))?;
    let mut parts = first_line.split_whitespace();
    let _method = parts
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing method".into()))?;
    parts
        .next()
        .ok_or_else(|| AuthError::InvalidAuthorizationResponse("missing path".into()))
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let response = format!(
        "{status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("failed to answer loopback request: {err}");
    }
}
