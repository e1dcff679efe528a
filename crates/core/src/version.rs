// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minor-version compatibility policy for required service instances.

use serde::{Deserialize, Serialize};

use crate::ids::MinorVersion;

/// How the configured minor version constrains acceptable offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Offers with `minor >= configured` are acceptable.
    MinimumMinorVersion,
    /// Offers must match exactly, unless configured as the `ANY` wildcard.
    ExactOrAnyMinorVersion,
}

impl VersionPolicy {
    /// Whether an offered minor version satisfies this policy.
    pub fn minor_matches(self, configured: MinorVersion, offered: MinorVersion) -> bool {
        match self {
            VersionPolicy::MinimumMinorVersion => offered >= configured,
            VersionPolicy::ExactOrAnyMinorVersion => {
                configured.is_any() || offered == configured
            }
        }
    }

    /// The minor version written into FindService entries.
    ///
    /// Under `MinimumMinorVersion` the find must not exclude newer minors,
    /// so the wildcard is sent; otherwise the configured value is sent.
    pub fn find_service_minor(self, configured: MinorVersion) -> MinorVersion {
        match self {
            VersionPolicy::MinimumMinorVersion => MinorVersion::ANY,
            VersionPolicy::ExactOrAnyMinorVersion => configured,
        }
    }
}

crate::simple_display! {
    VersionPolicy {
        MinimumMinorVersion => "minimum-minor-version",
        ExactOrAnyMinorVersion => "exact-or-any-minor-version",
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
