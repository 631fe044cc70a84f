//! A scripted backend for unit tests: records every request and answers
//! from a queue, falling back to an empty success.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::backend::*;

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Get(GetItemRequest),
    Put(PutItemRequest),
    Delete(DeleteItemRequest),
    Update(UpdateItemRequest),
    Query(QueryRequest),
    Scan(ScanRequest),
    BatchGet(BatchGetItemRequest),
    BatchWrite(BatchWriteItemRequest),
    Transact(TransactWriteItemsRequest),
}

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Get(GetItemResponse),
    Update(UpdateItemResponse),
    Page(PageResponse),
    BatchGet(BatchGetItemResponse),
    BatchWrite(BatchWriteItemResponse),
    Fail(BackendError),
}

#[derive(Debug, Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<Call>>,
    replies: Mutex<VecDeque<Reply>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reply(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn next(&self, call: Call) -> Option<Reply> {
        self.calls.lock().push(call);
        self.replies.lock().pop_front()
    }
}

fn unexpected<T>(reply: Reply) -> BackendResult<T> {
    match reply {
        Reply::Fail(err) => Err(err),
        other => panic!("unexpected scripted reply: {other:?}"),
    }
}

impl TableBackend for Recorder {
    fn get_item(&self, request: &GetItemRequest) -> BackendResult<GetItemResponse> {
        match self.next(Call::Get(request.clone())) {
            None => Ok(GetItemResponse::default()),
            Some(Reply::Get(response)) => Ok(response),
            Some(other) => unexpected(other),
        }
    }

    fn put_item(&self, request: &PutItemRequest) -> BackendResult<()> {
        match self.next(Call::Put(request.clone())) {
            None => Ok(()),
            Some(other) => unexpected(other),
        }
    }

    fn delete_item(&self, request: &DeleteItemRequest) -> BackendResult<()> {
        match self.next(Call::Delete(request.clone())) {
            None => Ok(()),
            Some(other) => unexpected(other),
        }
    }

    fn update_item(&self, request: &UpdateItemRequest) -> BackendResult<UpdateItemResponse> {
        match self.next(Call::Update(request.clone())) {
            None => Ok(UpdateItemResponse::default()),
            Some(Reply::Update(response)) => Ok(response),
            Some(other) => unexpected(other),
        }
    }

    fn query(&self, request: &QueryRequest) -> BackendResult<PageResponse> {
        match self.next(Call::Query(request.clone())) {
            None => Ok(PageResponse::default()),
            Some(Reply::Page(page)) => Ok(page),
            Some(other) => unexpected(other),
        }
    }

    fn scan(&self, request: &ScanRequest) -> BackendResult<PageResponse> {
        match self.next(Call::Scan(request.clone())) {
            None => Ok(PageResponse::default()),
            Some(Reply::Page(page)) => Ok(page),
            Some(other) => unexpected(other),
        }
    }

    fn batch_get_item(&self, request: &BatchGetItemRequest) -> BackendResult<BatchGetItemResponse> {
        match self.next(Call::BatchGet(request.clone())) {
            None => Ok(BatchGetItemResponse::default()),
            Some(Reply::BatchGet(response)) => Ok(response),
            Some(other) => unexpected(other),
        }
    }

    fn batch_write_item(
        &self,
        request: &BatchWriteItemRequest,
    ) -> BackendResult<BatchWriteItemResponse> {
        match self.next(Call::BatchWrite(request.clone())) {
            None => Ok(BatchWriteItemResponse::default()),
            Some(Reply::BatchWrite(response)) => Ok(response),
            Some(other) => unexpected(other),
        }
    }

    fn transact_write_items(&self, request: &TransactWriteItemsRequest) -> BackendResult<()> {
        match self.next(Call::Transact(request.clone())) {
            None => Ok(()),
            Some(other) => unexpected(other),
        }
    }
}

/// A clock that never sleeps and records requested sleeps.
#[derive(Debug, Default)]
pub(crate) struct StepClock {
    now: Mutex<f64>,
    pub(crate) sleeps: Mutex<Vec<std::time::Duration>>,
}

impl StepClock {
    pub(crate) fn at(now: f64) -> Self {
        Self {
            now: Mutex::new(now),
            sleeps: Mutex::default(),
        }
    }

    pub(crate) fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl crate::retry::Clock for StepClock {
    fn now_unix(&self) -> f64 {
        *self.now.lock()
    }

    fn sleep(&self, duration: std::time::Duration) {
        self.sleeps.lock().push(duration);
    }
}
