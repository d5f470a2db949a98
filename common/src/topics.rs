pub const TOPIC_SENSOR_DATA: &str = "sensor/humedad";

pub const DEFAULT_BROKER_HOST: &str = "broker.hivemq.com";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
