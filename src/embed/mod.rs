//! Embedded client shells.
//!
//! # Module Structure
//!
//! - `template` - Template types for typed variable injection
//! - `serve` - Live server pages and scripts (index.html, dev.js, test.js, wasi.js)
//! - `node` - Node test harness (test-node.mjs)
//!
//! # Usage
//!
//! ```ignore
//! use embed::serve::{ClientVars, DEV_JS};
//!
//! let js = DEV_JS.render(&ClientVars { push_url: "ws://127.0.0.1:35729/watcher".into() });
//! ```

mod template;

pub use template::{Template, TemplateVars};

pub mod serve {
    use super::{Template, TemplateVars};

    pub const DEV_JS_PATH: &str = "/dev.js";
    pub const TEST_JS_PATH: &str = "/test.js";
    pub const WASI_JS_PATH: &str = "/wasi.js";

    /// Variables for index.html.
    pub struct IndexVars {
        pub title: String,
        /// Entry script, `/dev.js` or `/test.js`
        pub script: &'static str,
    }

    impl TemplateVars for IndexVars {
        fn apply(&self, content: &str) -> String {
            content
                .replace("__WASMDEV_TITLE__", &self.title)
                .replace("__WASMDEV_SCRIPT__", self.script)
        }
    }

    /// HTML shell served at `/`.
    pub const INDEX_HTML: Template<IndexVars> =
        Template::new(include_str!("serve/index.html"));

    /// Variables for the client entry scripts.
    pub struct ClientVars {
        pub push_url: String,
    }

    impl TemplateVars for ClientVars {
        fn apply(&self, content: &str) -> String {
            content.replace("__WASMDEV_PUSH_URL__", &self.push_url)
        }
    }

    /// Dev client: runs the module, reloads on push, reports stack traces.
    pub const DEV_JS: Template<ClientVars> = Template::new(include_str!("serve/dev.js"));

    /// Test client: runs the test bundle and reports its output and result.
    pub const TEST_JS: Template<ClientVars> =
        Template::new(include_str!("serve/test.js"));

    /// Browser WASI shim shared by both clients.
    pub const WASI_JS: &str = include_str!("serve/wasi.js");
}

pub mod node {
    /// Node harness file name, written into the work dir.
    pub const HARNESS_NAME: &str = "test-node.mjs";

    /// Runs a bundle under `node:wasi`; env is read from `WASMDEV_TEST_ENV`.
    pub const HARNESS_MJS: &str = include_str!("serve/test-node.mjs");

    pub const ENV_VAR: &str = "WASMDEV_TEST_ENV";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_html_with_vars() {
        let vars = serve::IndexVars {
            title: "app".into(),
            script: serve::DEV_JS_PATH,
        };
        let html = serve::INDEX_HTML.render(&vars);
        assert!(html.contains("<title>app</title>"));
        assert!(html.contains(r#"src="/dev.js""#));
        assert!(!html.contains("__WASMDEV_"));
    }

    #[test]
    fn test_client_scripts_with_push_url() {
        let vars = serve::ClientVars {
            push_url: "ws://127.0.0.1:35730/watcher".into(),
        };
        for template in [serve::DEV_JS, serve::TEST_JS] {
            let js = template.render(&vars);
            assert!(js.contains("ws://127.0.0.1:35730/watcher"));
            assert!(!js.contains("__WASMDEV_PUSH_URL__"));
            assert!(js.contains(serve::WASI_JS_PATH));
        }
    }

    #[test]
    fn test_test_client_speaks_push_protocol() {
        let js = serve::TEST_JS.render(&serve::ClientVars { push_url: String::new() });
        assert!(js.contains("1001"));
        assert!(js.contains("1002"));
        assert!(js.contains(r#"kind: "testPassed""#));
        assert!(js.contains("/process-info.json"));
    }

    #[test]
    fn test_node_harness_reads_env() {
        assert!(node::HARNESS_MJS.contains(node::ENV_VAR));
        assert!(node::HARNESS_MJS.contains("node:wasi"));
    }
}
