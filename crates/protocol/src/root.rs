//! Repository root translation between the client and an upstream.
//!
//! A mirror may keep its repository under a different path than the master.
//! [`RootRewrite`] maps every path the protocol carries so each side only
//! ever sees its own root.

use std::borrow::Cow;

use crate::auth::AuthRequest;
use crate::request::Request;
use crate::response::Response;

/// Prefix translation from the client's repository root to an upstream's.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RootRewrite {
    client: String,
    upstream: String,
}

impl RootRewrite {
    /// Creates a rewrite, or `None` when both roots are the same path.
    #[must_use]
    pub fn new(client: &str, upstream: &str) -> Option<Self> {
        let client = trim_root(client);
        let upstream = trim_root(upstream);
        (client != upstream).then(|| Self {
            client: client.to_owned(),
            upstream: upstream.to_owned(),
        })
    }

    /// Root as seen by the client.
    #[must_use]
    pub fn client_root(&self) -> &str {
        &self.client
    }

    /// Root as seen by the upstream.
    #[must_use]
    pub fn upstream_root(&self) -> &str {
        &self.upstream
    }

    /// Addresses an authentication block to the upstream root.
    #[must_use]
    pub fn auth<'a>(&self, auth: &'a AuthRequest) -> Cow<'a, AuthRequest> {
        match replace_prefix(auth.root_line(), &self.client, &self.upstream) {
            Some(root) => Cow::Owned(auth.with_root_bytes(&root)),
            None => Cow::Borrowed(auth),
        }
    }

    /// Translates the paths a client request carries.
    #[must_use]
    pub fn request<'a>(&self, request: &'a Request) -> Cow<'a, Request> {
        let rewritten = match request.name() {
            "Root" | "Repository" => replace_prefix(request.argument(), &self.client, &self.upstream)
                .map(|argument| request.with_argument(&argument)),
            "Directory" => request
                .line(1)
                .and_then(|path| replace_prefix(path, &self.client, &self.upstream))
                .map(|path| request.with_line(1, &path)),
            _ => None,
        };
        rewritten.map_or(Cow::Borrowed(request), Cow::Owned)
    }

    /// Translates the repository line of a response back to the client root.
    #[must_use]
    pub fn response(&self, response: Response) -> Response {
        let rewritten = response
            .repository()
            .and_then(|path| replace_prefix(path, &self.upstream, &self.client))
            .map(|path| response.with_line(1, &path));
        rewritten.unwrap_or(response)
    }
}

fn trim_root(root: &str) -> &str {
    match root.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Replaces `from` with `to` when `from` is a whole-component prefix of `path`.
fn replace_prefix(path: &[u8], from: &str, to: &str) -> Option<Vec<u8>> {
    let rest = path.strip_prefix(from.as_bytes())?;
    if !(rest.is_empty() || rest.starts_with(b"/") || from == "/") {
        return None;
    }
    let mut out = Vec::with_capacity(to.len() + rest.len());
    out.extend_from_slice(to.as_bytes());
    if from == "/" && !rest.is_empty() && to != "/" {
        out.push(b'/');
    }
    if to == "/" && rest.starts_with(b"/") {
        out.extend_from_slice(&rest[1..]);
    } else {
        out.extend_from_slice(rest);
    }
    Some(out)
}
