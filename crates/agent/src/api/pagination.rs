/// Envelope for paginated list endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, skip: i64, limit: i64) -> Page<T> {
        Page {
            has_next: skip + limit < total,
            has_previous: skip > 0,
            items,
            total,
            skip,
            limit,
        }
    }
}
