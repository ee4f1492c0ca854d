//! Движки согласования. Отправитель и приёмник: два отдельных автомата,
//! общие у них только типы `SessionDescription` / `SignalingRecord`.

pub mod receiver;
pub mod sender;

pub use receiver::ReceiverEngine;
pub use sender::SenderEngine;
