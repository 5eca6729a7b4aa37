use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Newsletter {
    pub id: Uuid,
    pub editor_id: Uuid,
    pub name: String,
}
