use std::marker::PhantomData;

use futures_util::StreamExt;

use crate::connection::RowStream;
use crate::decode::FromRow;
use crate::error::SqlConduitError;

/// Forward-only cursor over a query result.
///
/// The cursor is active until its source reports the end of the result or an error.
/// From then on it is exhausted: the source is released and every further fetch
/// returns `Ok(None)` without touching the connection again. Dropping an active
/// cursor releases the source early; the connection stays usable either way.
///
/// ```rust,no_run
/// # use sql_conduit::prelude::*;
/// # async fn demo(conn: &mut impl Connection) -> Result<(), SqlConduitError> {
/// let mut cursor = conn
///     .fetch_cursor::<(i64, String)>(&Fragment::sql("SELECT id, name FROM users"))
///     .await?;
/// while let Some((id, name)) = cursor.next().await? {
///     println!("{id}: {name}");
/// }
/// assert!(cursor.is_exhausted());
/// # Ok(())
/// # }
/// ```
pub struct Cursor<'c, T> {
    source: Option<RowStream<'c>>,
    fetched: usize,
    _row: PhantomData<fn() -> T>,
}

impl<'c, T: FromRow> Cursor<'c, T> {
    pub(crate) fn new(source: RowStream<'c>) -> Self {
        Self {
            source: Some(source),
            fetched: 0,
            _row: PhantomData,
        }
    }

    /// A cursor with nothing left to read.
    #[must_use]
    pub fn exhausted() -> Self {
        Self {
            source: None,
            fetched: 0,
            _row: PhantomData,
        }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Rows returned so far.
    #[must_use]
    pub fn rows_fetched(&self) -> usize {
        self.fetched
    }

    /// Fetch the next row.
    ///
    /// # Errors
    /// Returns the source or decode error once; the cursor is exhausted afterwards.
    pub async fn next(&mut self) -> Result<Option<T>, SqlConduitError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        match source.next().await {
            Some(Ok(row)) => match T::from_row(row) {
                Ok(value) => {
                    self.fetched += 1;
                    Ok(Some(value))
                }
                Err(err) => {
                    self.source = None;
                    Err(err)
                }
            },
            Some(Err(err)) => {
                self.source = None;
                Err(err)
            }
            None => {
                self.source = None;
                Ok(None)
            }
        }
    }

    /// Drain the remaining rows into memory.
    ///
    /// # Errors
    /// Stops at the first error, as [`Cursor::next`] does.
    pub async fn collect_all(&mut self) -> Result<Vec<T>, SqlConduitError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Consume the cursor, returning the remaining rows.
    ///
    /// # Errors
    /// Stops at the first error, as [`Cursor::next`] does.
    pub async fn fetch_all(mut self) -> Result<Vec<T>, SqlConduitError> {
        self.collect_all().await
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    use futures_util::Stream;

    use super::*;
    use crate::row::{Columns, Row};
    use crate::types::Value;

    /// Yields the queued items then ends, counting every poll.
    struct CountingSource {
        remaining: Vec<Result<Row, SqlConduitError>>,
        polls: Arc<AtomicUsize>,
    }

    impl Stream for CountingSource {
        type Item = Result<Row, SqlConduitError>;

        fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if self.remaining.is_empty() {
                Poll::Ready(None)
            } else {
                Poll::Ready(Some(self.remaining.remove(0)))
            }
        }
    }

    fn source(items: Vec<Result<Row, SqlConduitError>>) -> (RowStream<'static>, Arc<AtomicUsize>) {
        let polls = Arc::new(AtomicUsize::new(0));
        let stream = CountingSource {
            remaining: items,
            polls: Arc::clone(&polls),
        };
        (Box::pin(stream), polls)
    }

    fn int_rows(n: i64) -> Vec<Result<Row, SqlConduitError>> {
        let columns = Columns::new(vec!["n".into()]);
        (1..=n).map(|i| Ok(columns.row(vec![Value::Int(i)]))).collect()
    }

    #[tokio::test]
    async fn exhausted_cursor_never_touches_source_again() {
        let (stream, polls) = source(int_rows(2));
        let mut cursor = Cursor::<i64>::new(stream);
        assert_eq!(cursor.next().await.unwrap(), Some(1));
        assert_eq!(cursor.next().await.unwrap(), Some(2));
        assert_eq!(cursor.next().await.unwrap(), None);
        assert!(cursor.is_exhausted());
        let after_exhaustion = polls.load(Ordering::SeqCst);
        for _ in 0..3 {
            assert_eq!(cursor.next().await.unwrap(), None);
        }
        assert_eq!(polls.load(Ordering::SeqCst), after_exhaustion);
        assert_eq!(cursor.rows_fetched(), 2);
    }

    #[tokio::test]
    async fn error_is_reported_once_then_exhausts() {
        let mut items = int_rows(1);
        items.push(Err(SqlConduitError::ExecutionError("boom".into())));
        items.extend(int_rows(1));
        let (stream, _) = source(items);
        let mut cursor = Cursor::<i64>::new(stream);
        assert_eq!(cursor.next().await.unwrap(), Some(1));
        assert!(cursor.next().await.is_err());
        assert_eq!(cursor.next().await.unwrap(), None);
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn fetch_all_drains_the_remainder() {
        let (stream, _) = source(int_rows(5));
        let mut cursor = Cursor::<i64>::new(stream);
        assert_eq!(cursor.next().await.unwrap(), Some(1));
        assert_eq!(cursor.fetch_all().await.unwrap(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn empty_cursor_is_exhausted_from_the_start() {
        let mut cursor = Cursor::<i64>::exhausted();
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(cursor.rows_fetched(), 0);
    }
}
