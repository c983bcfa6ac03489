// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fmt;

use shmem_protocols::shmem_msg::ShmemMsg;
use shmem_protocols::sim_error;
use shmem_protocols::types::{SimError, Time};

/// A coherence request waiting at, or being processed by, the directory.
///
/// Holds a private copy of the request message and the latest time at which
/// the request became ready to make progress.
#[derive(Debug)]
pub struct ShmemReq {
    msg: ShmemMsg,
    time: Time,
}

impl ShmemReq {
    /// Requests never carry a payload; a message with one is rejected.
    pub fn new(msg: &ShmemMsg, time: Time) -> Result<Self, SimError> {
        if msg.data().is_some() {
            return sim_error!(format!("Shmem requests should not have data payloads ({msg})"));
        }
        Ok(Self {
            msg: msg.rebuffer(),
            time,
        })
    }

    #[must_use]
    pub fn msg(&self) -> &ShmemMsg {
        &self.msg
    }

    #[must_use]
    pub fn time(&self) -> Time {
        self.time
    }

    /// Move the ready time forward. Earlier times are ignored.
    pub fn update_time(&mut self, time: Time) {
        if self.time < time {
            self.time = time;
        }
    }
}

impl fmt::Display for ShmemReq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @{}", self.msg, self.time)
    }
}

#[cfg(test)]
mod tests {
    use shmem_protocols::shmem_msg::{ShmemMsgCfg, ShmemMsgType};

    use super::*;

    fn ex_req() -> ShmemMsg {
        ShmemMsg::new(&ShmemMsgCfg {
            msg_type: ShmemMsgType::ExReq,
            requester: 2,
            address: 0x100,
            ..Default::default()
        })
    }

    #[test]
    fn time_only_moves_forward() {
        let mut req = ShmemReq::new(&ex_req(), Time(10)).unwrap();
        req.update_time(Time(4));
        assert_eq!(req.time(), Time(10));
        req.update_time(Time(25));
        assert_eq!(req.time(), Time(25));
    }

    #[test]
    fn payload_is_rejected() {
        let with_data = ex_req().with_data(vec![1; 4]);
        assert!(ShmemReq::new(&with_data, Time::ZERO).is_err());
    }

    #[test]
    fn keeps_its_own_copy() {
        let msg = ex_req();
        let req = ShmemReq::new(&msg, Time::ZERO).unwrap();
        assert_eq!(req.msg(), &msg);
    }
}
