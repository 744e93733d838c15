//! Offset pagination, cursor pagination and chunked iteration

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::builder::{field_value, AggregationBuilder};
use super::operator::Operator;
use super::stage::{SortDirection, Stage};
use super::{PipelineError, Result};

/// Cursor travel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorDirection {
    /// Rows after the cursor
    #[default]
    Next,
    /// Rows before the cursor
    Previous,
}

impl FromStr for CursorDirection {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "next" => Ok(CursorDirection::Next),
            "previous" | "prev" => Ok(CursorDirection::Previous),
            other => Err(PipelineError::InvalidArgument(format!(
                "cursor direction must be 'next' or 'previous', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for CursorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorDirection::Next => write!(f, "next"),
            CursorDirection::Previous => write!(f, "previous"),
        }
    }
}

/// Cursor pagination request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorRequest {
    /// Value of the cursor column to continue from; `None` starts at the edge
    #[serde(default)]
    pub cursor_id: Option<Value>,
    /// Cursor column; defaults to the configured cursor column
    #[serde(default)]
    pub column: Option<String>,
    /// Travel direction
    #[serde(default)]
    pub direction: CursorDirection,
    /// Page size
    pub limit: u64,
}

impl CursorRequest {
    /// First page in the forward direction
    pub fn first(limit: u64) -> Self {
        Self {
            cursor_id: None,
            column: None,
            direction: CursorDirection::Next,
            limit,
        }
    }

    /// Continue after `cursor`
    pub fn after(cursor: impl Into<Value>, limit: u64) -> Self {
        Self {
            cursor_id: Some(cursor.into()),
            ..Self::first(limit)
        }
    }

    /// Continue before `cursor`
    pub fn before(cursor: impl Into<Value>, limit: u64) -> Self {
        Self {
            cursor_id: Some(cursor.into()),
            direction: CursorDirection::Previous,
            ..Self::first(limit)
        }
    }

    /// Override the cursor column
    pub fn column(mut self, column: &str) -> Self {
        self.column = Some(column.to_string());
        self
    }
}

/// One page of cursor pagination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorPage {
    /// Rows on this page, in ascending cursor order
    pub documents: Vec<Value>,
    /// Whether another page exists in the travel direction
    pub has_more: bool,
    /// Cursor value of the first row beyond this page
    pub next_cursor_id: Option<Value>,
}

/// Offset pagination summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInfo {
    /// Page size
    pub limit: u64,
    /// Page number, starting at 1
    pub page: u64,
    /// Rows on this page
    pub result: u64,
    /// Rows matching the filter, ignoring skip/limit
    pub total: u64,
    /// Number of pages
    pub pages: u64,
}

/// One page of offset pagination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffsetPage {
    /// Rows on this page
    pub documents: Vec<Value>,
    /// Page summary
    pub pagination_info: PaginationInfo,
}

impl AggregationBuilder {
    /// Fetch one page by offset, plus the total count.
    ///
    /// Two round trips: the page itself, then a count against the stages as
    /// they were before skip/limit were added. Pages below 1 are treated as 1.
    /// The builder's stages are unchanged afterwards.
    pub async fn paginate(
        &mut self,
        page: u64,
        limit: impl Into<Option<u64>>,
    ) -> Result<OffsetPage> {
        let limit = limit.into().unwrap_or(self.config.page_size);
        if limit == 0 {
            return Err(PipelineError::InvalidArgument(
                "page size must be a positive integer".into(),
            ));
        }
        let page = page.max(1);
        let offset = (page - 1).checked_mul(limit).ok_or_else(|| {
            PipelineError::InvalidArgument(format!(
                "page {} with size {} is out of range",
                page, limit
            ))
        })?;

        let snapshot = self.stages.clone();
        self.skip(offset);
        self.limit(limit)?;
        let fetched = self.execute("paginate").await;
        self.stages = snapshot;
        let documents = fetched?;

        let total = self.clone().count().await?;

        Ok(OffsetPage {
            pagination_info: PaginationInfo {
                limit,
                page,
                result: documents.len() as u64,
                total,
                pages: total.div_ceil(limit),
            },
            documents,
        })
    }

    /// Fetch one page relative to a cursor value.
    ///
    /// Asks for one row more than the page size to detect further pages, then
    /// trims it: from the tail when moving forward, from the head when moving
    /// backward. The trimmed row's cursor column becomes `next_cursor_id`.
    /// No total count is computed. Stages are appended to this builder.
    pub async fn cursor_paginate(&mut self, request: CursorRequest) -> Result<CursorPage> {
        if request.limit == 0 {
            return Err(PipelineError::InvalidArgument(
                "cursor page size must be a positive integer".into(),
            ));
        }
        let column = request
            .column
            .clone()
            .unwrap_or_else(|| self.config.cursor_column.clone());
        let limit = usize::try_from(request.limit).map_err(|_| {
            PipelineError::InvalidArgument(format!(
                "cursor page size {} is out of range",
                request.limit
            ))
        })?;
        let fetch_limit = request.limit.checked_add(1).ok_or_else(|| {
            PipelineError::InvalidArgument(format!(
                "cursor page size {} is out of range",
                request.limit
            ))
        })?;

        let (operator, direction) = match request.direction {
            CursorDirection::Next if self.config.cursor_inclusive => {
                (Operator::Gte, SortDirection::Ascending)
            }
            CursorDirection::Next => (Operator::Gt, SortDirection::Ascending),
            CursorDirection::Previous => (Operator::Lt, SortDirection::Descending),
        };

        if let Some(cursor) = request.cursor_id.filter(|c| !c.is_null()) {
            self.where_operator(&column, operator, cursor)?;
        }
        self.push(Stage::Sort(vec![(column.clone(), direction)]));
        self.limit(fetch_limit)?;

        let mut documents = self.execute("cursor_paginate").await?;
        if request.direction == CursorDirection::Previous {
            documents.reverse();
        }

        let has_more = documents.len() > limit;
        let trimmed = if !has_more {
            None
        } else if request.direction == CursorDirection::Previous {
            Some(documents.remove(0))
        } else {
            documents.pop()
        };
        let next_cursor_id = trimmed.and_then(|row| field_value(&row, &column).cloned());

        Ok(CursorPage {
            documents,
            has_more,
            next_cursor_id,
        })
    }

    /// Walk every page of the current query, one page in flight at a time.
    ///
    /// The page count is computed once up front; rows inserted or deleted
    /// while chunking are not picked up. The callback receives the rows and
    /// the 1-based page number and returns `Ok(false)` to stop early.
    /// Returns the number of pages handed to the callback.
    pub async fn chunk<F, Fut>(&self, size: u64, mut callback: F) -> Result<u64>
    where
        F: FnMut(Vec<Value>, u64) -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        if size == 0 {
            return Err(PipelineError::InvalidArgument(
                "chunk size must be a positive integer".into(),
            ));
        }

        let total = self.clone().count().await?;
        let pages = total.div_ceil(size);
        tracing::debug!(collection = %self.collection, total, pages, "chunking");

        let mut processed = 0;
        for page in 1..=pages {
            let mut query = self.clone();
            query.skip((page - 1).saturating_mul(size));
            query.limit(size)?;
            let rows = query.execute("chunk").await?;

            processed += 1;
            if !callback(rows, page).await? {
                break;
            }
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direction_parse() {
        assert_eq!("next".parse::<CursorDirection>().unwrap(), CursorDirection::Next);
        assert_eq!("prev".parse::<CursorDirection>().unwrap(), CursorDirection::Previous);
        assert_eq!(
            "Previous".parse::<CursorDirection>().unwrap(),
            CursorDirection::Previous
        );
        assert!("sideways".parse::<CursorDirection>().is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let request: CursorRequest =
            serde_json::from_value(json!({ "cursorId": 10, "direction": "previous", "limit": 5 }))
                .unwrap();
        assert_eq!(request, CursorRequest::before(10, 5));
        assert!(request.column.is_none());
    }

    #[test]
    fn test_page_wire_shape() {
        let page = OffsetPage {
            documents: vec![],
            pagination_info: PaginationInfo {
                limit: 10,
                page: 1,
                result: 0,
                total: 0,
                pages: 0,
            },
        };
        let wire = serde_json::to_value(&page).unwrap();
        assert_eq!(wire["paginationInfo"]["pages"], json!(0));

        let cursor = CursorPage {
            documents: vec![],
            has_more: false,
            next_cursor_id: None,
        };
        assert_eq!(
            serde_json::to_value(&cursor).unwrap(),
            json!({ "documents": [], "hasMore": false, "nextCursorId": null })
        );
    }

    #[tokio::test]
    async fn test_zero_sizes_rejected() {
        let mut q = AggregationBuilder::detached("users");
        assert!(matches!(
            q.paginate(1, 0).await,
            Err(PipelineError::InvalidArgument(_))
        ));
        assert!(matches!(
            q.cursor_paginate(CursorRequest::first(0)).await,
            Err(PipelineError::InvalidArgument(_))
        ));
        assert!(matches!(
            q.chunk(0, |_, _| async { Ok(true) }).await,
            Err(PipelineError::InvalidArgument(_))
        ));
        assert!(q.stages().is_empty());
    }

    #[tokio::test]
    async fn test_paginate_restores_stages_on_failure() {
        let mut q = AggregationBuilder::detached("users");
        q.where_eq("active", true);
        assert!(q.paginate(3, 10).await.is_err());
        assert_eq!(q.stages().len(), 1);
    }
}
