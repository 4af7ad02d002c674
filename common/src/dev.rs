// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities intended for development tools and the test suite.  These
//! should not be used in production code.

use slog::{o, Drain, Logger};

/// Set up a [`slog::Logger`] appropriate for a test named `test_name`
///
/// The logger writes synchronously to stdout so output interleaves sanely
/// with test harness capture.
pub fn test_setup_log(test_name: &str) -> Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!("test" => test_name.to_string()))
}
