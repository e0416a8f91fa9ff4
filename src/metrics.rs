#[derive(Debug, Clone, Default)]
pub struct PageMetrics {
    pub page_number: usize,
    pub box_count: usize,
    pub command_count: usize,
    pub render_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ExportMetrics {
    pub pages: Vec<PageMetrics>,
    pub total_render_ms: f64,
    pub total_bytes: usize,
}
