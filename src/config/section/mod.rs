//! Configuration section definitions.
//!
//! Each module corresponds to a section in `wasmdev.toml`:
//!
//! | Module  | TOML Section | Purpose                               |
//! |---------|--------------|---------------------------------------|
//! | `build` | `[build]`    | Build command, target, product        |
//! | `dev`   | `[dev]`      | Development server and watcher        |
//! | `test`  | `[test]`     | Test environment selection            |

mod build;
mod dev;
mod test;

pub use build::BuildConfig;
pub use dev::DevConfig;
pub use test::TestConfig;
