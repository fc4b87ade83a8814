mod broadcast_runtime;

pub use broadcast_runtime::{ChangeNotice, NotificationBroadcaster, UiSurface, WatcherStateNotice};
