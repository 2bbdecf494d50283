//! Tracking-script injection for HTML deliverables.

/// Stable marker making injection idempotent.
pub const TRACKING_MARKER: &str = "Lead Magnet Tracking Script";

/// Inject the tracking script into an HTML document.
///
/// Idempotent: documents already carrying the marker are returned
/// unchanged. The script lands immediately before `</body>` when present,
/// else it is appended.
pub fn inject_tracking_script(html: &str, job_id: &str, tenant_id: &str) -> String {
    if html.contains(TRACKING_MARKER) {
        return html.to_string();
    }

    let script = format!(
        "<!-- {TRACKING_MARKER} -->\n\
         <script>\n\
         (function() {{\n\
           var payload = {{ job_id: \"{job_id}\", tenant_id: \"{tenant_id}\", event: \"view\", ts: Date.now() }};\n\
           try {{\n\
             navigator.sendBeacon(\"/t/events\", JSON.stringify(payload));\n\
           }} catch (e) {{}}\n\
         }})();\n\
         </script>"
    );

    match find_body_close(html) {
        Some(position) => {
            let mut result = String::with_capacity(html.len() + script.len() + 1);
            result.push_str(&html[..position]);
            result.push_str(&script);
            result.push('\n');
            result.push_str(&html[position..]);
            result
        }
        None => format!("{html}\n{script}"),
    }
}

fn find_body_close(html: &str) -> Option<usize> {
    html.to_ascii_lowercase().find("</body>")
}
