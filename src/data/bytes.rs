use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait Ser {
    fn ser(&self) -> Result<Vec<u8>, bincode::Error>;
}

pub trait Deser: Sized {
    fn deser(bytes: &[u8]) -> Result<Self, bincode::Error>;
}

impl<T: Serialize> Ser for T {
    fn ser(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }
}

impl<T: DeserializeOwned> Deser for T {
    fn deser(bytes: &[u8]) -> Result<T, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
