mod support;

mod layer_comm;
