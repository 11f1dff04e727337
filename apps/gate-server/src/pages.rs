//! Server-rendered HTML for the creation form and the gate.
//!
//! Every interpolated value goes through [`html_escape`].

use domain::gate::{ClickStep, PreviewAction};
use domain::Link;
use http_common::html_escape;

const STYLE: &str = r#"
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #f1f5f9;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            padding: 20px;
        }
        .card {
            background: white;
            border-radius: 16px;
            box-shadow: 0 25px 50px -12px rgba(0,0,0,0.25);
            max-width: 480px;
            width: 100%;
            overflow: hidden;
        }
        .body { padding: 24px; }
        h1, h2 { color: #1e293b; margin-bottom: 16px; text-align: center; }
        label { display: block; font-weight: 600; color: #334155; margin: 12px 0 4px; }
        input[type=url], input[type=text], input[type=file] {
            width: 100%; padding: 10px; border: 1px solid #cbd5e1; border-radius: 8px;
        }
        .btn {
            display: block; width: 100%; text-align: center; text-decoration: none;
            color: white; font-weight: 700; padding: 14px; border: none;
            border-radius: 8px; margin-top: 12px; cursor: pointer; font-size: 1rem;
        }
        .blue { background: #2563eb; } .green { background: #16a34a; }
        .red { background: #dc2626; } .indigo { background: #4f46e5; }
        .orange { background: #f97316; }
        .grid { display: grid; grid-template-columns: 1fr 1fr; gap: 12px; }
        .grid .btn { margin-top: 0; }
        .cover { width: 100%; aspect-ratio: 16 / 9; object-fit: cover; background: #e2e8f0; display: block; }
        .steps {
            background: #fefce8; border-left: 4px solid #facc15; border-radius: 6px;
            padding: 12px 16px; color: #1f2937; font-size: 0.9rem; margin-top: 20px;
        }
        .steps li { margin-left: 18px; }
        .count { font-size: 4rem; font-weight: 900; color: #2563eb; text-align: center; }
        .muted { color: #64748b; font-size: 0.875rem; text-align: center; margin-top: 12px; }
        .ok { color: #16a34a; font-weight: 700; text-align: center; margin-top: 12px; }
        .err { color: #dc2626; font-weight: 700; text-align: center; }
        .stats { text-align: center; margin-top: 20px; color: #64748b; }
        .stats b { color: #2563eb; font-size: 1.25rem; }
"#;

fn layout(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    {head_extra}
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="card">{body}</div>
</body>
</html>"#,
        title = html_escape(title),
    )
}

/// Creation form with the live visitor total.
///
/// The inline script forwards share URLs (`#/v/<token>`) to the gate route
/// and subscribes to the stats stream.
pub fn home_page(total: u64) -> String {
    let body = format!(
        r#"
        <div class="body">
            <h1>Create a gated link</h1>
            <form method="post" action="/create" enctype="multipart/form-data">
                <label for="content_url">Content URL</label>
                <input type="url" id="content_url" name="content_url" required>
                <label for="ads_url">Ads URL</label>
                <input type="url" id="ads_url" name="ads_url" required>
                <label for="image">Cover image</label>
                <input type="file" id="image" name="image" accept="image/*" required>
                <button class="btn blue" type="submit">Generate Link</button>
            </form>
            <p class="stats">Realtime Total Visitors: <b id="total">{total}</b></p>
        </div>
        <script>
            if (location.hash.indexOf('#/v/') === 0) {{
                location.replace('/v/' + encodeURIComponent(location.hash.slice(4)));
            }}
            if (window.EventSource) {{
                var es = new EventSource('/api/stats/stream');
                es.addEventListener('total', function (e) {{
                    document.getElementById('total').textContent = Number(e.data).toLocaleString();
                }});
            }}
        </script>"#,
    );
    layout("Link Gate", "", &body)
}

pub fn created_page(share_url: &str) -> String {
    let url = html_escape(share_url);
    let body = format!(
        r#"
        <div class="body">
            <h2>Your link is ready</h2>
            <input type="text" id="share" readonly value="{url}" onclick="this.select()">
            <button class="btn indigo" type="button" id="copy">Copy</button>
            <a class="btn green" href="{url}">Open link</a>
            <a class="btn blue" href="/">Create another</a>
        </div>
        <script>
            document.getElementById('copy').addEventListener('click', function () {{
                var share = document.getElementById('share');
                var done = function () {{ alert('Link Copied!'); }};
                if (navigator.clipboard) {{
                    navigator.clipboard.writeText(share.value).then(done);
                }} else {{
                    share.select();
                    document.execCommand('copy');
                    done();
                }}
            }});
        </script>"#
    );
    layout("Link created", "", &body)
}

/// Creation failure. Retryable errors invite a resubmit.
pub fn create_error_page(message: &str, retryable: bool) -> String {
    let hint = if retryable {
        "Something went wrong on our side. Please try again."
    } else {
        "Please fill in all fields and try again."
    };
    let body = format!(
        r#"
        <div class="body">
            <h2>Could not create link</h2>
            <p class="err">{message}</p>
            <p class="muted">{hint}</p>
            <a class="btn blue" href="/">Back to the form</a>
        </div>"#,
        message = html_escape(message),
    );
    layout("Error", "", &body)
}

pub fn not_found_page() -> String {
    layout(
        "Not found",
        "",
        r#"<div class="body"><p class="err">Link not found or expired.</p></div>"#,
    )
}

pub fn unavailable_page() -> String {
    layout(
        "Unavailable",
        "",
        r#"<div class="body">
            <p class="err">This link could not be loaded right now.</p>
            <p class="muted">Please reload the page in a moment.</p>
        </div>"#,
    )
}

/// Gate preview: cover image, shortcut buttons, instructions and "Continue".
pub fn preview_page(link: &Link) -> String {
    let token = html_escape(link.token.as_str());
    let colors = ["red", "green", "indigo", "orange"];
    let buttons: String = PreviewAction::ALL
        .iter()
        .zip(colors)
        .map(|(action, color)| {
            format!(
                r#"<a class="btn {color}" href="/v/{token}/shortcut/{}">{}</a>"#,
                action.as_str(),
                action.label()
            )
        })
        .collect();
    let body = format!(
        r#"
        <img class="cover" src="{image}" alt="Content Preview">
        <div class="body">
            <div class="grid">{buttons}</div>
            <ol class="steps">
                <li>Press "Continue".</li>
                <li>If an ad opens, go back.</li>
                <li>Wait for the countdown.</li>
                <li>Press "Get Link" when it appears.</li>
                <li>Go back again and press "Get Link" once more.</li>
            </ol>
            <a class="btn blue" href="/v/{token}/wait">Click Here to Continue</a>
        </div>"#,
        image = html_escape(&link.image_url),
    );
    layout("Preview", "", &body)
}

/// Countdown step. While `remaining > 0` the page refreshes itself once a
/// second with one second less; at zero it offers "Get Link".
pub fn countdown_page(link: &Link, remaining: u32, click_step: ClickStep) -> String {
    let token = html_escape(link.token.as_str());
    let (head, tail) = if remaining > 0 {
        (
            format!(
                r#"<meta http-equiv="refresh" content="1;url=/v/{token}/wait?remaining={}">"#,
                remaining - 1
            ),
            r#"<p class="muted">Preparing destination...</p>"#.to_string(),
        )
    } else {
        let hint = match click_step {
            ClickStep::First => "Click above to unlock content",
            ClickStep::Return => "Link unlocked! Click again.",
        };
        (
            String::new(),
            format!(
                r#"<p class="ok">Your Link almost ready</p>
            <a class="btn green" href="/v/{token}/go">Get Link</a>
            <p class="muted">{hint}</p>"#
            ),
        )
    };
    let body = format!(
        r#"
        <div class="body">
            <h2>Please Wait...</h2>
            <div class="count">{remaining}</div>
            {tail}
        </div>"#
    );
    layout("Please Wait", &head, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Token;
    use std::time::SystemTime;

    fn link() -> Link {
        Link {
            token: Token::new("abc12345").unwrap(),
            content_url: "https://content.example".into(),
            ads_url: "https://ads.example".into(),
            image_url: "/blobs/images/x_<cover>.png".into(),
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn preview_links_every_shortcut_and_escapes_image() {
        let html = preview_page(&link());
        for action in PreviewAction::ALL {
            assert!(html.contains(&format!("/v/abc12345/shortcut/{}", action.as_str())));
            assert!(html.contains(action.label()));
        }
        assert!(html.contains("x_&lt;cover&gt;.png"));
        assert!(!html.contains("content.example"));
    }

    #[test]
    fn countdown_refreshes_until_zero() {
        let html = countdown_page(&link(), 3, ClickStep::First);
        assert!(html.contains("url=/v/abc12345/wait?remaining=2"));
        assert!(!html.contains("Get Link"));

        let done = countdown_page(&link(), 0, ClickStep::First);
        assert!(!done.contains("http-equiv=\"refresh\""));
        assert!(done.contains("/v/abc12345/go"));
        assert!(done.contains("Click above to unlock content"));

        let back = countdown_page(&link(), 0, ClickStep::Return);
        assert!(back.contains("Link unlocked! Click again."));
    }

    #[test]
    fn created_page_offers_copy_and_escapes_url() {
        let html = created_page("https://gate.example/#/v/abc12345?a=1&b=2");
        assert!(html.contains(r#"id="share" readonly value="https://gate.example/#/v/abc12345?a=1&amp;b=2""#));
        assert!(html.contains(r#"id="copy">Copy</button>"#));
        assert!(html.contains("navigator.clipboard.writeText(share.value)"));
    }

    #[test]
    fn error_page_hint_follows_retryability() {
        assert!(create_error_page("upload failed", true).contains("try again"));
        assert!(create_error_page("<b>", false).contains("&lt;b&gt;"));
    }
}
