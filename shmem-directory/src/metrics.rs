// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fmt;

/// Event counts gathered by the directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryMetrics {
    /// Requests received from private caches.
    pub requests: usize,
    /// Requests that had to wait behind another transaction on the address.
    pub queued_requests: usize,
    /// InvReq messages sent.
    pub invalidations: usize,
    /// FlushReq messages sent.
    pub flushes: usize,
    /// WbReq messages sent.
    pub downgrades: usize,
    /// Acknowledgements consumed by pending requests.
    pub acks: usize,
    /// Unsolicited evictions accepted.
    pub write_backs: usize,
    pub dram_reads: usize,
    pub dram_writes: usize,
    /// Bits the directory would put on the wire under the modeled format.
    pub modeled_bits_sent: usize,
}

impl fmt::Display for DirectoryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "requests:          {}", self.requests)?;
        writeln!(f, "queued requests:   {}", self.queued_requests)?;
        writeln!(f, "invalidations:     {}", self.invalidations)?;
        writeln!(f, "flushes:           {}", self.flushes)?;
        writeln!(f, "downgrades:        {}", self.downgrades)?;
        writeln!(f, "acks:              {}", self.acks)?;
        writeln!(f, "write-backs:       {}", self.write_backs)?;
        writeln!(f, "dram reads:        {}", self.dram_reads)?;
        writeln!(f, "dram writes:       {}", self.dram_writes)?;
        write!(f, "modeled bits sent: {}", self.modeled_bits_sent)
    }
}
