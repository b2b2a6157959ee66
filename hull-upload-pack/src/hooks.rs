//! Observer hooks invoked with the parsed request of each protocol phase.
//!
//! Hooks see the request read-only; returning an error vetoes the phase and
//! surfaces at the session boundary like any other engine failure.

use crate::error::Result;
use crate::request::{CapabilitiesRequest, FetchRequest, LsRefsRequest};

/// Observers for the command dialect's phases.
pub trait ProtocolHooks {
    /// Called before the capability advertisement is written.
    fn on_capabilities(&mut self, _request: &CapabilitiesRequest) -> Result<()> {
        Ok(())
    }

    /// Called after an `ls-refs` command was parsed, before refs are listed.
    fn on_ls_refs(&mut self, _request: &LsRefsRequest) -> Result<()> {
        Ok(())
    }

    /// Called after a `fetch` command was parsed, before any validation.
    fn on_fetch(&mut self, _request: &FetchRequest) -> Result<()> {
        Ok(())
    }
}

/// The default hook set: observe nothing, veto nothing.
#[derive(Debug, Default)]
pub struct NoopHooks;

impl ProtocolHooks for NoopHooks {}
