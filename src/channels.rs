use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_monitor: broadcast::Sender<crate::coordinator::ChannelData>,
    pub to_datalog: broadcast::Sender<crate::datalog_writer::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_monitor: Self::channel(),
            to_datalog: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
