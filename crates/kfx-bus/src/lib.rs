mod bus;
mod task;

pub use bus::{ListenerResult, TaskBus, HISTORY_CAPACITY};
pub use task::{
    new_task_group_id, BpmUpdateTask, FftResultVectorReuseTask, GenericTask, NewFftDataTask,
    ProcessingTimeUpdateTask, Task, TaskPayload, TimeSignatureUpdateTask, TrackInfoUpdateTask,
};
